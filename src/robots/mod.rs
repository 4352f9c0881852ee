//! Per-host robots.txt cache.
//!
//! On the first query for a host the cache fetches `scheme://host/robots.txt`
//! through the shared transport (same proxy as the pipeline), parses it, and
//! answers every later `allowed()` for that host from memory. Unreachable or
//! error responses fail open: the host is cached as allow-all and warned
//! about once. The cache lives for the process; it is never persisted.

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::utils::{ROBOTS_FETCH_TIMEOUT_SECS, loggable_url};

/// Cached ruleset for one host. `body: None` means fetch failed or the
/// server answered >= 400; both resolve as allow-all.
#[derive(Debug)]
struct HostRules {
    body: Option<String>,
}

/// Process-lifetime robots cache keyed by origin (scheme://host[:port]).
///
/// Two concurrent misses for one origin fetch once: each origin maps to a
/// `OnceCell` whose initializer performs the single fetch.
pub struct RobotsCache {
    client: reqwest::Client,
    hosts: DashMap<String, Arc<OnceCell<HostRules>>>,
}

impl RobotsCache {
    /// Build a cache over the shared transport.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            hosts: DashMap::new(),
        }
    }

    /// Whether `user_agent` may fetch `url` under the host's robots rules.
    ///
    /// Fails open: unparseable URLs, unreachable robots.txt, and evaluation
    /// errors all resolve to `true`.
    pub async fn allowed(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        if parsed.host_str().is_none() {
            return true;
        }
        // Origin keeps non-default ports distinct and gives the exact
        // robots.txt location back.
        let origin = parsed.origin().ascii_serialization();

        let cell = self
            .hosts
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let rules = cell.get_or_init(|| self.fetch_rules(origin.clone())).await;

        match &rules.body {
            Some(body) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(body, user_agent, url)
            }
            None => true,
        }
    }

    async fn fetch_rules(&self, origin: String) -> HostRules {
        let robots_url = format!("{origin}/robots.txt");
        debug!("Fetching robots rules for {origin}");

        let response = self
            .client
            .get(&robots_url)
            .timeout(Duration::from_secs(ROBOTS_FETCH_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => HostRules { body: Some(body) },
                Err(e) => {
                    warn!("robots.txt body read failed for {origin}, allowing all: {e}");
                    HostRules { body: None }
                }
            },
            Ok(resp) => {
                warn!(
                    "robots.txt for {origin} answered {}, allowing all",
                    resp.status()
                );
                HostRules { body: None }
            }
            Err(e) => {
                warn!(
                    "robots.txt fetch failed for {}, allowing all: {e}",
                    loggable_url(&robots_url)
                );
                HostRules { body: None }
            }
        }
    }

    /// Number of hosts with cached rules (present or failed-open).
    #[must_use]
    pub fn cached_hosts(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disallow_rule_blocks_matching_path() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private\n")
            .expect(1)
            .create_async()
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let base = server.url();

        assert!(!cache.allowed(&format!("{base}/private/a"), "dragnet").await);
        assert!(cache.allowed(&format!("{base}/public"), "dragnet").await);
        // Second query hits the cache, not the server (expect(1) above).
        assert!(!cache.allowed(&format!("{base}/private/b"), "dragnet").await);
    }

    #[tokio::test]
    async fn missing_robots_fails_open() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(cache.allowed(&format!("{}/anything", server.url()), "dragnet").await);
        assert_eq!(cache.cached_hosts(), 1);
    }

    #[tokio::test]
    async fn invalid_url_fails_open() {
        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(cache.allowed("not a url", "dragnet").await);
        assert_eq!(cache.cached_hosts(), 0);
    }
}
