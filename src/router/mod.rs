//! Strategy router: the per-URL decision procedure.
//!
//! Composes robots → HTTP → escalation decision → browser into exactly one
//! persisted record per job. Per-URL isolation is absolute here: every
//! fetcher error is converted into an `other_error` record and nothing
//! propagates.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

use crate::classifier::{self, PageSignals};
use crate::http_fetcher::HttpFetcher;
use crate::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus, UrlJob, UrlRecord};
use crate::utils::{
    ERROR_MESSAGE_MAX_CHARS, JS_REQUIRED_MARKERS, extract_host, is_fetchable_url, loggable_url,
    truncate_message,
};

/// Escalation predicate over the primary-stage result.
///
/// The browser stage is warranted when the HTTP response was an error or
/// timeout, when the body is too thin to be a real page, or when the body
/// carries block/JS-required markers that a renderer might resolve.
#[must_use]
pub fn needs_browser(record: &FetchRecord, thin_content_bytes: usize) -> bool {
    if matches!(record.status, FetchStatus::HttpError | FetchStatus::Timeout) {
        return true;
    }

    if record.status == FetchStatus::Success {
        if record.content_length.unwrap_or(0) < thin_content_bytes as u64 {
            return true;
        }

        if let Some(body) = &record.body {
            let lower = body.to_lowercase();
            if JS_REQUIRED_MARKERS.iter().any(|m| lower.contains(m)) {
                return true;
            }

            // A suspected (below-threshold) block signal on a 2xx page is
            // worth one render attempt; a confirmed one never reaches here
            // because the fetcher already flipped the status.
            let verdict = classifier::classify(PageSignals {
                status: record.http_status.unwrap_or(0),
                final_url: &record.url,
                server: None,
                body,
            });
            if verdict.confidence >= 0.5 {
                return true;
            }
        }
    }

    false
}

/// The fallback stage as the router consumes it. The production
/// implementation is the headless-browser fetcher; tests substitute
/// fixtures to pin down the routing decisions.
#[async_trait]
pub trait FallbackFetch: Send + Sync {
    async fn fetch(&self, job: &UrlJob, stage: FetchStage) -> anyhow::Result<FetchRecord>;
}

/// Per-shard router over the shared HTTP fetcher and the shard's browser
/// fetcher.
pub struct StrategyRouter {
    http: Arc<HttpFetcher>,
    browser: Option<Arc<dyn FallbackFetch>>,
    thin_content_bytes: usize,
}

impl StrategyRouter {
    #[must_use]
    pub fn new(
        http: Arc<HttpFetcher>,
        browser: Option<Arc<dyn FallbackFetch>>,
        thin_content_bytes: usize,
    ) -> Self {
        Self {
            http,
            browser,
            thin_content_bytes,
        }
    }

    /// Produce exactly one record for one job. Infallible by contract.
    pub async fn route_and_fetch(&self, job: &UrlJob) -> UrlRecord {
        // Structural validation costs no network.
        if !is_fetchable_url(&job.url) {
            let mut record = FetchRecord::bare(
                &job.url,
                &extract_host(&job.url).unwrap_or_default(),
                FetchMethod::Http,
                FetchStage::Primary,
            );
            record.shard_index = job.shard_index;
            record.status = FetchStatus::InvalidUrl;
            record.finished_at = Some(chrono::Utc::now());
            return record.into_url_record();
        }

        let http_result = match self.http.fetch(job).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "HTTP fetcher failed unexpectedly for {}: {e:#}",
                    loggable_url(&job.url)
                );
                return self.other_error_record(job, FetchMethod::Http, FetchStage::Primary, &e);
            }
        };

        // Terminal primary outcomes: robots and CAPTCHA never escalate.
        // A CAPTCHA the HTTP stage saw would greet the browser identically.
        if matches!(
            http_result.status,
            FetchStatus::RobotsBlocked | FetchStatus::CaptchaDetected | FetchStatus::TooLarge
        ) {
            return http_result.into_url_record();
        }

        let escalate = job.hint_dynamic || needs_browser(&http_result, self.thin_content_bytes);
        if !escalate {
            return http_result.into_url_record();
        }

        let Some(browser) = &self.browser else {
            debug!(
                "Escalation wanted for {} but no browser stage available",
                loggable_url(&job.url)
            );
            return http_result.into_url_record();
        };

        debug!("Escalating {} to browser stage", loggable_url(&job.url));
        match browser.fetch(job, FetchStage::Fallback).await {
            Ok(browser_result) => browser_result.into_url_record(),
            Err(e) => {
                warn!(
                    "Browser fetcher failed unexpectedly for {}: {e:#}",
                    loggable_url(&job.url)
                );
                self.other_error_record(job, FetchMethod::Browser, FetchStage::Fallback, &e)
            }
        }
    }

    fn other_error_record(
        &self,
        job: &UrlJob,
        method: FetchMethod,
        stage: FetchStage,
        error: &anyhow::Error,
    ) -> UrlRecord {
        let mut record = FetchRecord::bare(
            &job.url,
            &extract_host(&job.url).unwrap_or_default(),
            method,
            stage,
        );
        record.shard_index = job.shard_index;
        record.status = FetchStatus::OtherError;
        record.error_kind = Some(error_kind_of(error));
        record.error_message = Some(truncate_message(
            &format!("{error:#}"),
            ERROR_MESSAGE_MAX_CHARS,
        ));
        record.finished_at = Some(chrono::Utc::now());
        record.into_url_record()
    }
}

/// Short stable tag for an unexpected error, derived from its root cause.
fn error_kind_of(error: &anyhow::Error) -> String {
    let root = error.root_cause().to_string();
    if root.contains("timeout") {
        "Timeout".to_string()
    } else if root.contains("connection") || root.contains("connect") {
        "Connect".to_string()
    } else if root.contains("browser") || root.contains("Chrome") || root.contains("page") {
        "Browser".to_string()
    } else {
        "Unexpected".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_record(status: FetchStatus, content_length: Option<u64>, body: Option<&str>) -> FetchRecord {
        let mut record = FetchRecord::bare(
            "https://example.com/",
            "example.com",
            FetchMethod::Http,
            FetchStage::Primary,
        );
        record.status = status;
        record.http_status = Some(200);
        record.content_length = content_length;
        record.body = body.map(ToString::to_string);
        record
    }

    #[test]
    fn errors_and_timeouts_escalate() {
        assert!(needs_browser(
            &http_record(FetchStatus::HttpError, Some(5000), None),
            1024
        ));
        assert!(needs_browser(
            &http_record(FetchStatus::Timeout, None, None),
            1024
        ));
    }

    #[test]
    fn thin_content_escalates() {
        let rec = http_record(FetchStatus::Success, Some(300), Some("<html>tiny</html>"));
        assert!(needs_browser(&rec, 1024));
    }

    #[test]
    fn full_page_does_not_escalate() {
        let body = format!("<html><body>{}</body></html>", "content ".repeat(400));
        let len = body.len() as u64;
        let rec = http_record(FetchStatus::Success, Some(len), Some(&body));
        assert!(!needs_browser(&rec, 1024));
    }

    #[test]
    fn js_required_marker_escalates() {
        let body = format!(
            "<html><body>Please enable JavaScript to view this site. {}</body></html>",
            "padding ".repeat(400)
        );
        let len = body.len() as u64;
        let rec = http_record(FetchStatus::Success, Some(len), Some(&body));
        assert!(needs_browser(&rec, 1024));
    }

    #[test]
    fn suspected_block_signal_escalates() {
        let body = format!(
            "<html><body>Are you a robot? {}</body></html>",
            "padding ".repeat(400)
        );
        let len = body.len() as u64;
        let rec = http_record(FetchStatus::Success, Some(len), Some(&body));
        assert!(needs_browser(&rec, 1024));
    }

    #[test]
    fn captcha_and_robots_never_reach_the_predicate() {
        // Router short-circuits these before the predicate; the predicate
        // itself also answers false.
        assert!(!needs_browser(
            &http_record(FetchStatus::CaptchaDetected, Some(5000), None),
            1024
        ));
        assert!(!needs_browser(
            &http_record(FetchStatus::RobotsBlocked, None, None),
            1024
        ));
    }
}
