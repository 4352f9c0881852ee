//! Robots-aware HTTP fetcher: the cheap primary stage.
//!
//! One GET per job through a shared transport, with rotated request
//! identity, typed outcome mapping, bounded retries for transient
//! failures, and the block classifier run over every body.

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rand::prelude::IndexedRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::classifier::{self, PageSignals};
use crate::config::Config;
use crate::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus, UrlJob};
use crate::robots::RobotsCache;
use crate::scheduler::DomainScheduler;
use crate::utils::{
    ACCEPT_LANGUAGE_POOL, MAX_HTTP_RETRIES, USER_AGENT_POOL, extract_host, loggable_url,
    truncate_message, ERROR_MESSAGE_MAX_CHARS,
};

/// Build the shared HTTP transport for the whole batch.
///
/// HTTP/2 is negotiated when the server offers it; redirects are followed
/// up to 5 hops (the same bound applies to robots.txt fetches through this
/// client). The per-request timeout is applied per call, not here, so the
/// robots cache can use its own shorter deadline.
pub fn build_transport(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .gzip(true)
        .brotli(true)
        .connect_timeout(Duration::from_secs(config.http_timeout_secs.min(10)))
        .pool_max_idle_per_host(config.per_host_concurrency);

    if let Some(proxy) = &config.proxy {
        if let Some(url) = proxy.url_for("http") {
            let mut p = reqwest::Proxy::all(&url).context("Invalid proxy URL")?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        } else {
            warn!("Proxy config present but has no http port; continuing direct");
        }
    }

    builder.build().context("Failed to build HTTP transport")
}

/// HTTP stage fetcher sharing the batch transport, robots cache and
/// scheduler.
pub struct HttpFetcher {
    client: reqwest::Client,
    robots: Arc<RobotsCache>,
    scheduler: Arc<DomainScheduler>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        robots: Arc<RobotsCache>,
        scheduler: Arc<DomainScheduler>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            robots,
            scheduler,
            timeout: Duration::from_secs(config.http_timeout_secs),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Perform the primary-stage GET for one job.
    ///
    /// Expected failures (robots, timeout, error status, CAPTCHA, oversize)
    /// come back as records, never as `Err`; `Err` is reserved for bugs and
    /// is converted to `other_error` by the router.
    pub async fn fetch(&self, job: &UrlJob) -> Result<FetchRecord> {
        let host = extract_host(&job.url).unwrap_or_default();
        let mut record = FetchRecord::bare(&job.url, &host, FetchMethod::Http, FetchStage::Primary);
        record.shard_index = job.shard_index;

        let user_agent = USER_AGENT_POOL
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENT_POOL[0]);
        let accept_language = ACCEPT_LANGUAGE_POOL
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(ACCEPT_LANGUAGE_POOL[0]);

        // Robots first: a disallowed URL never costs a slot or a request.
        if !self.robots.allowed(&job.url, user_agent).await {
            debug!("Robots disallows {}", loggable_url(&job.url));
            record.status = FetchStatus::RobotsBlocked;
            record.robots_disallowed = true;
            record.finished_at = Some(Utc::now());
            return Ok(record);
        }

        let _permit = self.scheduler.acquire(&host).await;
        record.started_at = Some(Utc::now());

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let outcome = self
                .client
                .get(&job.url)
                .header(reqwest::header::USER_AGENT, user_agent)
                .header(reqwest::header::ACCEPT_LANGUAGE, accept_language)
                .timeout(self.timeout)
                .send()
                .await;

            match outcome {
                Err(e) if e.is_timeout() => {
                    if attempt < MAX_HTTP_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    record.latency_ms = Some(started.elapsed().as_millis() as u64);
                    record.status = FetchStatus::Timeout;
                    record.error_kind = Some("Timeout".to_string());
                    record.error_message =
                        Some(truncate_message(&e.to_string(), ERROR_MESSAGE_MAX_CHARS));
                    self.scheduler.record_error(&host);
                    break;
                }
                Err(e) => {
                    let transient = e.is_connect();
                    if transient && attempt < MAX_HTTP_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    record.latency_ms = Some(started.elapsed().as_millis() as u64);
                    record.status = FetchStatus::HttpError;
                    record.error_kind = Some(classify_transport_error(&e));
                    record.error_message =
                        Some(truncate_message(&e.to_string(), ERROR_MESSAGE_MAX_CHARS));
                    self.scheduler.record_error(&host);
                    break;
                }
                Ok(resp) => {
                    let code = resp.status().as_u16();

                    // Transient server answers are retried with backoff.
                    if (code >= 500 || code == 429) && attempt < MAX_HTTP_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }

                    self.finish_from_response(&mut record, resp, started, &host)
                        .await;
                    break;
                }
            }
        }

        record.retries = attempt;
        record.finished_at = Some(Utc::now());
        Ok(record)
    }

    /// Map a received response into the record: status taxonomy, decoded
    /// body bookkeeping, size cap, classifier.
    async fn finish_from_response(
        &self,
        record: &mut FetchRecord,
        resp: reqwest::Response,
        started: Instant,
        host: &str,
    ) {
        let code = resp.status().as_u16();
        record.http_status = Some(code);

        let final_url = resp.url().to_string();
        let server_header = resp
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_default();

        record.encoding = Some(declared_charset(&content_type));

        // Oversize by declared length: skip the read entirely.
        if let Some(declared) = resp.content_length()
            && declared as usize > self.max_body_bytes
        {
            record.latency_ms = Some(started.elapsed().as_millis() as u64);
            record.status = FetchStatus::TooLarge;
            record.content_length = Some(declared);
            return;
        }

        // Decoded with the declared charset, UTF-8 with replacement
        // otherwise (reqwest's text() implements exactly that).
        let body = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                record.latency_ms = Some(started.elapsed().as_millis() as u64);
                record.status = FetchStatus::HttpError;
                record.error_kind = Some("BodyRead".to_string());
                record.error_message =
                    Some(truncate_message(&e.to_string(), ERROR_MESSAGE_MAX_CHARS));
                self.scheduler.record_error(host);
                return;
            }
        };
        record.latency_ms = Some(started.elapsed().as_millis() as u64);
        record.content_length = Some(body.len() as u64);

        if body.len() > self.max_body_bytes {
            record.status = FetchStatus::TooLarge;
            return;
        }

        record.status = if (200..400).contains(&code) {
            FetchStatus::Success
        } else {
            FetchStatus::HttpError
        };
        if record.status == FetchStatus::HttpError {
            self.scheduler.record_error(host);
        }

        let verdict = classifier::classify(PageSignals {
            status: code,
            final_url: &final_url,
            server: server_header.as_deref(),
            body: &body,
        });
        if verdict.present {
            record.captcha_detected = true;
            record.status = FetchStatus::CaptchaDetected;
            record.error_kind = Some(format!("{:?}", verdict.vendor));
            record.error_message = Some(verdict.reason);
            self.scheduler.record_captcha(host);
        }

        // Only HTML-family bodies feed the router's completeness check;
        // everything else is dropped here.
        if is_html_like(&content_type) {
            record.body = Some(body);
        }
    }
}

/// Exponential backoff with jitter for transient retries.
fn retry_backoff(attempt: u32) -> Duration {
    const BASE_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 8_000;
    const JITTER_PERCENT: f64 = 0.2;

    let exp_delay = BASE_DELAY_MS.saturating_mul(1 << attempt.min(4));
    let jitter = rand::rng().random_range(-JITTER_PERCENT..=JITTER_PERCENT);
    let jittered = (exp_delay as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(jittered.min(MAX_DELAY_MS))
}

fn classify_transport_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        "Connect".to_string()
    } else if e.is_redirect() {
        "RedirectLoop".to_string()
    } else if e.is_body() || e.is_decode() {
        "BodyRead".to_string()
    } else {
        "Transport".to_string()
    }
}

fn declared_charset(content_type: &str) -> String {
    content_type
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            part.strip_prefix("charset=")
                .map(|cs| cs.trim_matches('"').to_lowercase())
        })
        .next()
        .unwrap_or_else(|| "utf-8".to_string())
}

fn is_html_like(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.is_empty() || ct.contains("text/html") || ct.contains("application/xhtml+xml")
}
