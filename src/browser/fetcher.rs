//! Headless browser fetcher: the fallback stage.
//!
//! Each URL gets an isolated context on the shard's browser handle:
//! stealth injection first, then asset blocking, then navigation under a
//! clamped timeout, an optional best-effort content-selector wait, and a
//! content snapshot. The classifier runs over the rendered content; the
//! session's cookies and web storage are re-applied before navigation and
//! snapshotted after.

use anyhow::{Context, Result};
use chrono::Utc;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventResponseReceived, ResourceType, SetBlockedUrLsParams,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::classifier::{self, PageSignals};
use crate::config::{Config, StealthLevel};
use crate::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus, UrlJob};
use crate::scheduler::DomainScheduler;
use crate::stealth::{self, Session, SessionStore, StorageState, StoredCookie, StoredOrigin};
use crate::utils::{ERROR_MESSAGE_MAX_CHARS, extract_host, loggable_url, truncate_message};

use super::handle::BrowserHandle;

/// Requests aborted in every browser context. Rendering does not need
/// them and they dominate page weight.
const BLOCKED_ASSET_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.bmp", "*.tiff", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.eot", "*.mp4", "*.webm", "*.mp3", "*.wav", "*.avi", "*.mov",
    "*.flac", "*.ogg",
];

const SELECTOR_WAIT_SECS: u64 = 5;
const SELECTOR_POLL_MS: u64 = 250;

/// Quiet period after the load event standing in for a network-idle
/// barrier, which the CDP driver does not expose directly. Long enough
/// for straggler XHRs to land, short enough not to dominate latency.
const NETWORK_IDLE_SETTLE_MS: u64 = 500;

/// A page operation that outran its budget.
///
/// Typed so the retry path can tell a hung navigation (worth one retry in
/// a fresh context, recorded as `timeout`) apart from a navigation that
/// failed outright (recorded as `http_error`).
#[derive(Debug, Error)]
#[error("{operation} exceeded its {budget:?} budget")]
pub struct PageDeadline {
    operation: &'static str,
    budget: Duration,
}

/// Run one page operation under a budget, converting overruns into
/// [`PageDeadline`].
async fn under_deadline<T>(
    budget: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::Error::new(PageDeadline { operation, budget })),
    }
}

/// Status and server header of the main-frame document response,
/// captured from the CDP event stream during navigation.
#[derive(Debug, Clone)]
struct DocumentResponse {
    status: u16,
    server: Option<String>,
}

/// Fallback-stage fetcher bound to one shard's browser handle and session.
pub struct BrowserFetcher {
    handle: Arc<BrowserHandle>,
    scheduler: Arc<DomainScheduler>,
    session: Session,
    session_store: Option<Arc<SessionStore>>,
    stealth_level: StealthLevel,
    network_profile: Option<crate::config::NetworkProfile>,
    nav_timeout_secs: u64,
    content_selector: Option<String>,
    block_stylesheets: bool,
}

impl BrowserFetcher {
    #[must_use]
    pub fn new(
        handle: Arc<BrowserHandle>,
        scheduler: Arc<DomainScheduler>,
        session: Session,
        session_store: Option<Arc<SessionStore>>,
        config: &Config,
    ) -> Self {
        Self {
            handle,
            scheduler,
            session,
            session_store,
            stealth_level: config.stealth_level,
            network_profile: config.network_profile,
            nav_timeout_secs: config.nav_timeout_secs,
            content_selector: config.content_selector.clone(),
            block_stylesheets: config.block_stylesheets,
        }
    }

    /// Fetch one URL in an isolated context.
    ///
    /// Navigation failures get at most one retry in a fresh context; every
    /// expected outcome comes back as a record.
    pub async fn fetch(&self, job: &UrlJob, stage: FetchStage) -> Result<FetchRecord> {
        let host = extract_host(&job.url).unwrap_or_default();
        let mut record = FetchRecord::bare(&job.url, &host, FetchMethod::Browser, stage);
        record.shard_index = job.shard_index;

        let _permit = self.scheduler.acquire(&host).await;
        record.started_at = Some(Utc::now());

        let mut attempt: u32 = 0;
        loop {
            match self.fetch_in_context(job).await {
                Ok(outcome) => {
                    record.latency_ms = Some(outcome.latency_ms);
                    record.content_length = Some(outcome.body.len() as u64);
                    record.encoding = Some("utf-8".to_string());
                    record.http_status = outcome.document.as_ref().map(|d| d.status);

                    // Same taxonomy as the HTTP stage: a rendered page
                    // behind an error status is still an error. With no
                    // captured status the render itself is the evidence.
                    record.status = match record.http_status {
                        Some(code) if !(200..400).contains(&code) => {
                            self.scheduler.record_error(&host);
                            FetchStatus::HttpError
                        }
                        _ => FetchStatus::Success,
                    };

                    let verdict = classifier::classify(PageSignals {
                        status: record.http_status.unwrap_or(0),
                        final_url: &outcome.final_url,
                        server: outcome
                            .document
                            .as_ref()
                            .and_then(|d| d.server.as_deref()),
                        body: &outcome.body,
                    });
                    if verdict.present {
                        record.captcha_detected = true;
                        record.status = FetchStatus::CaptchaDetected;
                        record.error_kind = Some(format!("{:?}", verdict.vendor));
                        record.error_message = Some(verdict.reason);
                        self.scheduler.record_captcha(&host);
                    }

                    record.body = Some(outcome.body);
                    break;
                }
                Err(e) => {
                    let timed_out = e.downcast_ref::<PageDeadline>().is_some();

                    if attempt < 1 {
                        attempt += 1;
                        debug!(
                            "Browser retry for {} after: {e:#}",
                            loggable_url(&job.url)
                        );
                        // A hung navigation can poison the whole browser;
                        // start the retry from a clean process.
                        self.handle.invalidate().await;
                        continue;
                    }

                    record.status = if timed_out {
                        FetchStatus::Timeout
                    } else {
                        FetchStatus::HttpError
                    };
                    record.error_kind = Some(if timed_out {
                        "NavigationTimeout".to_string()
                    } else {
                        "Navigation".to_string()
                    });
                    record.error_message =
                        Some(truncate_message(&format!("{e:#}"), ERROR_MESSAGE_MAX_CHARS));
                    self.scheduler.record_error(&host);
                    break;
                }
            }
        }

        record.retries = attempt;
        record.finished_at = Some(Utc::now());
        Ok(record)
    }

    /// One context lifecycle: create, prepare, navigate, snapshot, close.
    async fn fetch_in_context(&self, job: &UrlJob) -> Result<ContextOutcome> {
        let page = self.handle.new_page().await?;
        let result = self.drive_page(&page, job).await;

        // Close the context regardless of outcome; a leaked page keeps
        // its renderer process alive.
        if let Err(e) = page.close().await {
            warn!("Page close failed: {e}");
        }
        result
    }

    async fn drive_page(&self, page: &Page, job: &UrlJob) -> Result<ContextOutcome> {
        stealth::inject(page, &self.session, self.stealth_level)
            .await
            .context("stealth injection failed")?;

        if self.stealth_level >= StealthLevel::Aggressive
            && let Some(profile) = self.network_profile
        {
            stealth::network::apply(page, profile).await?;
        }

        self.block_assets(page).await?;
        self.restore_storage(page).await;
        let watcher = self.watch_document_response(page).await;

        let started = Instant::now();

        // One composite budget covers navigation and the load event: the
        // per-URL deadline the rest of the pipeline reasons about is the
        // whole page attempt, not its CDP sub-steps.
        under_deadline(
            Duration::from_secs(self.nav_timeout_secs),
            "navigation",
            async {
                page.goto(&job.url).await.context("Navigation failed")?;
                page.wait_for_navigation()
                    .await
                    .context("Load wait failed")?;
                Ok(())
            },
        )
        .await?;

        // Network-idle approximation: let straggler requests finish after
        // the load event before content is judged.
        tokio::time::sleep(Duration::from_millis(NETWORK_IDLE_SETTLE_MS)).await;

        if let Some(selector) = &self.content_selector {
            self.wait_for_selector(page, selector).await;
        }

        // Trajectory and scroll cadence are part of the fingerprint at
        // moderate stealth and above. Best effort: an input dispatch
        // failure must not lose the page content.
        if self.stealth_level >= StealthLevel::Moderate {
            let viewport = (
                f64::from(self.session.profile.viewport_width),
                f64::from(self.session.profile.viewport_height),
            );
            let from = (viewport.0 * 0.1, viewport.1 * 0.2);
            let to = (viewport.0 * 0.55, viewport.1 * 0.6);
            if let Err(e) = stealth::behavior::humanize_mouse_move(page, from, to).await {
                debug!("Mouse emulation skipped: {e:#}");
            }
            if let Err(e) = stealth::behavior::humanize_scroll(page, viewport.1 * 0.8).await {
                debug!("Scroll emulation skipped: {e:#}");
            }
        }

        let body = page
            .content()
            .await
            .context("Content snapshot failed")?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| job.url.clone());

        self.snapshot_storage(page, &final_url).await;

        let document = match watcher {
            Some((task, slot)) => {
                task.abort();
                slot.lock().clone()
            }
            None => None,
        };

        Ok(ContextOutcome {
            body,
            final_url,
            latency_ms,
            document,
        })
    }

    /// Watch the CDP event stream for the main-frame document response so
    /// the classifier sees the real status code and server header on this
    /// stage too. Redirect chains emit several Document responses; the
    /// last one before snapshot is the page that actually rendered. Best
    /// effort: without the listener the fetch proceeds status-blind.
    async fn watch_document_response(
        &self,
        page: &Page,
    ) -> Option<(
        tokio::task::JoinHandle<()>,
        Arc<parking_lot::Mutex<Option<DocumentResponse>>>,
    )> {
        let mut events = match page.event_listener::<EventResponseReceived>().await {
            Ok(events) => events,
            Err(e) => {
                debug!("Document response watcher unavailable: {e}");
                return None;
            }
        };

        let slot: Arc<parking_lot::Mutex<Option<DocumentResponse>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&slot);

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.r#type != ResourceType::Document {
                    continue;
                }
                let status = u16::try_from(event.response.status).unwrap_or(0);
                let server = event
                    .response
                    .headers
                    .inner()
                    .as_object()
                    .and_then(|headers| {
                        headers
                            .iter()
                            .find(|(name, _)| name.eq_ignore_ascii_case("server"))
                    })
                    .and_then(|(_, value)| value.as_str())
                    .map(ToString::to_string);
                *sink.lock() = Some(DocumentResponse { status, server });
            }
        });

        Some((task, slot))
    }

    /// Abort image/font/media (and optionally stylesheet) requests.
    async fn block_assets(&self, page: &Page) -> Result<()> {
        page.execute(EnableParams::default())
            .await
            .context("Network enable failed")?;

        let mut patterns: Vec<String> = BLOCKED_ASSET_PATTERNS
            .iter()
            .map(ToString::to_string)
            .collect();
        if self.block_stylesheets {
            patterns.push("*.css".to_string());
        }

        page.execute(SetBlockedUrLsParams::new(patterns))
            .await
            .context("setBlockedURLs failed")?;
        Ok(())
    }

    /// Best-effort selector wait with a short secondary timeout.
    async fn wait_for_selector(&self, page: &Page, selector: &str) {
        let deadline = Instant::now() + Duration::from_secs(SELECTOR_WAIT_SECS);
        loop {
            if page.find_element(selector).await.is_ok() {
                return;
            }
            if Instant::now() >= deadline {
                debug!("Content selector {selector} not found within wait budget");
                return;
            }
            tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
        }
    }

    /// Re-apply the session's cookies and pre-seed localStorage for its
    /// known origins. Best effort: a stale cookie must not fail the fetch.
    async fn restore_storage(&self, page: &Page) {
        let storage = &self.session.storage;

        if !storage.cookies.is_empty() {
            let params: Vec<CookieParam> = storage
                .cookies
                .iter()
                .filter_map(|c| {
                    CookieParam::builder()
                        .name(c.name.clone())
                        .value(c.value.clone())
                        .domain(c.domain.clone())
                        .path(c.path.clone())
                        .secure(c.secure)
                        .http_only(c.http_only)
                        .build()
                        .ok()
                })
                .collect();
            if !params.is_empty()
                && let Err(e) = page.set_cookies(params).await
            {
                warn!("Cookie restore failed: {e}");
            }
        }

        if !storage.origins.is_empty() {
            // Seed localStorage via init script so entries exist before any
            // page script reads them, but only on the matching origin.
            if let Ok(payload) = serde_json::to_string(&storage.origins) {
                let script = format!(
                    r#"(() => {{
                        const origins = {payload};
                        for (const o of origins) {{
                            if (o.origin === location.origin) {{
                                for (const [k, v] of o.local_storage) {{
                                    try {{ localStorage.setItem(k, v); }} catch (e) {{}}
                                }}
                            }}
                        }}
                    }})();"#
                );
                if let Err(e) = page
                    .execute(
                        chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams {
                            source: script,
                            include_command_line_api: None,
                            world_name: None,
                            run_immediately: None,
                        },
                    )
                    .await
                {
                    warn!("localStorage restore failed: {e}");
                }
            }
        }
    }

    /// Snapshot cookies + current-origin localStorage into the session
    /// store. Best effort; persistence failures only warn.
    async fn snapshot_storage(&self, page: &Page, final_url: &str) {
        let Some(store) = &self.session_store else {
            return;
        };

        let mut state = StorageState {
            cookies: Vec::new(),
            origins: self.session.storage.origins.clone(),
        };

        match page.get_cookies().await {
            Ok(cookies) => {
                state.cookies = cookies
                    .into_iter()
                    .map(|c| StoredCookie {
                        name: c.name,
                        value: c.value,
                        domain: c.domain,
                        path: c.path,
                        expires: Some(c.expires),
                        secure: c.secure,
                        http_only: c.http_only,
                    })
                    .collect();
            }
            Err(e) => {
                warn!("Cookie snapshot failed: {e}");
                state.cookies = self.session.storage.cookies.clone();
            }
        }

        let dump_script = r#"(() => {
            const entries = [];
            for (let i = 0; i < localStorage.length; i++) {
                const key = localStorage.key(i);
                entries.push([key, localStorage.getItem(key)]);
            }
            return JSON.stringify(entries);
        })()"#;
        if let Ok(result) = page.evaluate(dump_script).await
            && let Ok(raw) = result.into_value::<String>()
            && let Ok(entries) = serde_json::from_str::<Vec<(String, String)>>(&raw)
            && !entries.is_empty()
            && let Ok(parsed) = url::Url::parse(final_url)
        {
            let origin = parsed.origin().ascii_serialization();
            state.origins.retain(|o| o.origin != origin);
            state.origins.push(StoredOrigin {
                origin,
                local_storage: entries,
            });
        }

        if let Err(e) = store.save_storage(&self.session.session_id, &state).await {
            warn!("Session storage persist failed: {e:#}");
        }
    }
}

struct ContextOutcome {
    body: String,
    final_url: String,
    latency_ms: u64,
    document: Option<DocumentResponse>,
}

#[async_trait::async_trait]
impl crate::router::FallbackFetch for BrowserFetcher {
    async fn fetch(&self, job: &UrlJob, stage: FetchStage) -> Result<FetchRecord> {
        BrowserFetcher::fetch(self, job, stage).await
    }
}
