//! Runtime configuration for a batch run.
//!
//! All tunables load from environment variables in one place, with
//! defaulting and clamping applied here so the rest of the pipeline can
//! trust every value. In `ci` environments missing critical variables are
//! fatal; elsewhere defaults apply.

mod proxy;

pub use proxy::ProxyConfig;

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::utils::constants::*;

/// Startup-fatal configuration problems (the spec's input-error class).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set when ENV=ci")]
    MissingCritical { name: &'static str },
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("unreadable proxy config {path}: {source}")]
    Proxy {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Deployment environment, from `ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    Local,
    Ci,
    Colab,
}

impl RunEnv {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "ci" => Self::Ci,
            "colab" => Self::Colab,
            _ => Self::Local,
        }
    }
}

/// Stealth patch level applied to browser contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StealthLevel {
    Minimal,
    Moderate,
    Aggressive,
}

impl StealthLevel {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "minimal" => Self::Minimal,
            "aggressive" => Self::Aggressive,
            _ => Self::Moderate,
        }
    }
}

/// Named network throttle profile for aggressive stealth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkProfile {
    Slow3g,
    Fast3g,
    FourG,
    Wifi,
    Dsl,
}

/// Complete, validated batch configuration.
///
/// Constructed once at startup and passed by reference; never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: RunEnv,
    pub data_dir: PathBuf,
    /// Per-request HTTP timeout, clamped [5, 30] s.
    pub http_timeout_secs: u64,
    /// Global concurrency slots, clamped [8, 64].
    pub global_concurrency: usize,
    /// Default per-host concurrency slots.
    pub per_host_concurrency: usize,
    /// Hosts with stricter slot counts (search engines default to 1).
    pub host_overrides: HashMap<String, usize>,
    /// Optional jitter applied after slot acquisition, seconds.
    pub jitter_range_secs: Option<(f64, f64)>,
    /// Whether the browser fallback stage is available at all. Off means
    /// every escalation decision resolves to keeping the HTTP result.
    pub browser_enabled: bool,
    pub browser_headless: bool,
    /// Browser page concurrency, clamped [1, 4].
    pub browser_concurrency: usize,
    /// Browser navigation timeout, clamped [10, 45] s.
    pub nav_timeout_secs: u64,
    /// Browser handle recycled after this many contexts.
    pub browser_recycle_after: usize,
    pub shard_size: usize,
    pub max_body_bytes: usize,
    pub thin_content_bytes: usize,
    pub record_buffer: usize,
    pub stealth_level: StealthLevel,
    /// Network throttle, applied only at aggressive stealth.
    pub network_profile: Option<NetworkProfile>,
    /// Optional persistent session identity for the browser stage.
    pub session_id: Option<String>,
    /// Best-effort CSS selector waited on after browser navigation.
    pub content_selector: Option<String>,
    /// Abort image/font/media requests in the browser; optionally also CSS.
    pub block_stylesheets: bool,
    pub proxy: Option<ProxyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut host_overrides = HashMap::new();
        // Search engines are the quickest to rate-limit and CAPTCHA.
        for host in ["www.google.com", "www.bing.com", "duckduckgo.com"] {
            host_overrides.insert(host.to_string(), 1);
        }
        Self {
            env: RunEnv::Local,
            data_dir: PathBuf::from("./data"),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            global_concurrency: DEFAULT_GLOBAL_CONCURRENCY,
            per_host_concurrency: DEFAULT_PER_HOST_CONCURRENCY,
            host_overrides,
            jitter_range_secs: Some((0.05, 0.35)),
            browser_enabled: true,
            browser_headless: true,
            browser_concurrency: DEFAULT_BROWSER_CONCURRENCY,
            nav_timeout_secs: DEFAULT_NAV_TIMEOUT_SECS,
            browser_recycle_after: DEFAULT_BROWSER_RECYCLE_AFTER,
            shard_size: DEFAULT_SHARD_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            thin_content_bytes: DEFAULT_THIN_CONTENT_BYTES,
            record_buffer: DEFAULT_RECORD_BUFFER,
            stealth_level: StealthLevel::Moderate,
            network_profile: None,
            session_id: None,
            content_selector: None,
            block_stylesheets: false,
            proxy: None,
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// Recognized variables: `ENV`, `DATA_DIR`, `HTTPX_TIMEOUT_SECONDS`,
    /// `HTTPX_MAX_CONCURRENCY`, `BROWSER_HEADLESS`, `BROWSER_ENABLED`,
    /// `BROWSER_MAX_CONCURRENCY`, `SHARD_SIZE`, `PROXY_CONFIG_PATH`,
    /// `STEALTH_MODE`, `SESSION_ID`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.env = std::env::var("ENV")
            .map(|v| RunEnv::parse(&v))
            .unwrap_or(RunEnv::Local);

        match std::env::var("DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => config.data_dir = PathBuf::from(dir),
            _ if config.env == RunEnv::Ci => {
                return Err(ConfigError::MissingCritical { name: "DATA_DIR" });
            }
            _ => {}
        }

        if let Some(secs) = parse_env_u64("HTTPX_TIMEOUT_SECONDS")? {
            config.http_timeout_secs = secs.clamp(HTTP_TIMEOUT_MIN_SECS, HTTP_TIMEOUT_MAX_SECS);
        }

        if let Some(n) = parse_env_u64("HTTPX_MAX_CONCURRENCY")? {
            config.global_concurrency =
                (n as usize).clamp(GLOBAL_CONCURRENCY_MIN, GLOBAL_CONCURRENCY_MAX);
        }

        if let Ok(v) = std::env::var("BROWSER_HEADLESS") {
            config.browser_headless = parse_bool(&v);
        }

        if let Ok(v) = std::env::var("BROWSER_ENABLED") {
            config.browser_enabled = parse_bool(&v);
        }

        if let Some(n) = parse_env_u64("BROWSER_MAX_CONCURRENCY")? {
            config.browser_concurrency =
                (n as usize).clamp(BROWSER_CONCURRENCY_MIN, BROWSER_CONCURRENCY_MAX);
        }

        if let Some(n) = parse_env_u64("SHARD_SIZE")? {
            config.shard_size = (n as usize).max(1);
        }

        if let Ok(level) = std::env::var("STEALTH_MODE") {
            config.stealth_level = StealthLevel::parse(&level);
        }

        if let Ok(session) = std::env::var("SESSION_ID")
            && !session.trim().is_empty()
        {
            config.session_id = Some(session);
        }

        if let Ok(path) = std::env::var("PROXY_CONFIG_PATH") {
            let path = PathBuf::from(path);
            match ProxyConfig::load(&path) {
                Ok(proxy) => config.proxy = Some(proxy),
                Err(source) if config.env == RunEnv::Ci => {
                    return Err(ConfigError::Proxy { path, source });
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable proxy config: {e:#}");
                }
            }
        }

        Ok(config)
    }

    /// Per-host slot count, honoring overrides.
    #[must_use]
    pub fn host_slots(&self, host: &str) -> usize {
        self.host_overrides
            .get(host)
            .copied()
            .unwrap_or(self.per_host_concurrency)
            .max(1)
    }

    /// Directory for shard checkpoints.
    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    /// Directory for persisted sessions.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Path of the per-URL records file.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("stats.jsonl")
    }

    /// Path of the run summary.
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.data_dir.join("run_summary.json")
    }
}

fn parse_env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber {
                    name,
                    value: raw.clone(),
                })?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | ""
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_clamps() {
        let c = Config::default();
        assert!((GLOBAL_CONCURRENCY_MIN..=GLOBAL_CONCURRENCY_MAX).contains(&c.global_concurrency));
        assert!((HTTP_TIMEOUT_MIN_SECS..=HTTP_TIMEOUT_MAX_SECS).contains(&c.http_timeout_secs));
        assert!(
            (BROWSER_CONCURRENCY_MIN..=BROWSER_CONCURRENCY_MAX).contains(&c.browser_concurrency)
        );
    }

    #[test]
    fn host_slots_override_and_floor() {
        let mut c = Config::default();
        c.host_overrides.insert("slow.test".to_string(), 0);
        assert_eq!(c.host_slots("www.google.com"), 1);
        assert_eq!(c.host_slots("anything.test"), c.per_host_concurrency);
        assert_eq!(c.host_slots("slow.test"), 1, "zero override floors to 1");
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }
}
