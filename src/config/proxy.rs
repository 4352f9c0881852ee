//! Proxy configuration.
//!
//! Loaded from the JSON file named by `PROXY_CONFIG_PATH`. Credentials are
//! held in memory for transport construction only; the `Debug`
//! implementation redacts them so they cannot leak through error chains or
//! log lines.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Proxy endpoint with per-protocol ports and optional credentials.
#[derive(Clone, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    /// Port by protocol, e.g. {"http": 8080, "socks5": 1080}.
    pub ports: HashMap<String, u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Two-letter region code of the proxy exit, when known. Used to pick
    /// region-consistent locale/timezone for device profiles.
    #[serde(default)]
    pub region: Option<String>,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proxy config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed proxy config {}", path.display()))?;
        if config.host.trim().is_empty() {
            anyhow::bail!("Proxy config has empty host");
        }
        if config.ports.is_empty() {
            anyhow::bail!("Proxy config has no ports");
        }
        Ok(config)
    }

    /// Proxy URL for the given protocol, without credentials.
    #[must_use]
    pub fn url_for(&self, protocol: &str) -> Option<String> {
        self.ports
            .get(protocol)
            .map(|port| format!("{protocol}://{}:{port}", self.host))
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("ports", &self.ports)
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}
