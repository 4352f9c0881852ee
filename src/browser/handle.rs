//! Shard-scoped browser handle with bounded lifetime.
//!
//! One handle serves a whole shard; pages (contexts) are created per URL.
//! After a fixed number of contexts the underlying Chrome process is
//! closed and relaunched to bound memory growth, which long headless
//! sessions otherwise accumulate without limit.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct HandleInner {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

/// Owning wrapper around a launched browser and its CDP handler task.
pub struct BrowserHandle {
    inner: Mutex<Option<HandleInner>>,
    contexts_opened: AtomicUsize,
    recycle_after: usize,
    headless: bool,
    user_agent: String,
    viewport: (u32, u32),
}

impl BrowserHandle {
    /// Launch a browser for one shard, sized to the session profile's
    /// viewport.
    pub async fn launch(
        headless: bool,
        user_agent: &str,
        viewport: (u32, u32),
        recycle_after: usize,
    ) -> Result<Self> {
        let inner = launch_inner(headless, user_agent, viewport).await?;
        Ok(Self {
            inner: Mutex::new(Some(inner)),
            contexts_opened: AtomicUsize::new(0),
            recycle_after: recycle_after.max(1),
            headless,
            user_agent: user_agent.to_string(),
            viewport,
        })
    }

    /// Open a fresh blank page, recycling the browser first when the
    /// context budget is spent.
    pub async fn new_page(&self) -> Result<Page> {
        let opened = self.contexts_opened.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.lock().await;

        if opened > 0 && opened % self.recycle_after == 0 {
            info!(
                "Recycling browser after {} contexts",
                self.recycle_after
            );
            if let Some(old) = guard.take() {
                shutdown_inner(old).await;
            }
        }

        if guard.is_none() {
            *guard = Some(launch_inner(self.headless, &self.user_agent, self.viewport).await?);
        }

        let inner = guard.as_ref().expect("browser just ensured");
        let page = inner
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to create page")?;
        debug!("Opened browser context #{}", opened + 1);
        Ok(page)
    }

    /// Force a relaunch on the next `new_page`, used after a context-level
    /// failure that suggests the browser itself is unhealthy.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(old) = guard.take() {
            warn!("Invalidating browser handle after failure");
            shutdown_inner(old).await;
        }
    }

    /// Total contexts opened through this handle.
    #[must_use]
    pub fn contexts_opened(&self) -> usize {
        self.contexts_opened.load(Ordering::Relaxed)
    }

    /// Graceful close: browser first, then the handler task, then the
    /// profile directory.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            shutdown_inner(inner).await;
        }
    }
}

async fn launch_inner(
    headless: bool,
    user_agent: &str,
    viewport: (u32, u32),
) -> Result<HandleInner> {
    let user_data_dir = std::env::temp_dir().join(format!(
        "dragnet_chrome_{}_{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    let (browser, handler) =
        super::setup::launch_browser(headless, user_agent, viewport, user_data_dir.clone()).await?;
    Ok(HandleInner {
        browser,
        handler,
        user_data_dir,
    })
}

async fn shutdown_inner(mut inner: HandleInner) {
    if let Err(e) = inner.browser.close().await {
        warn!("Browser close failed: {e}");
    }
    if let Err(e) = inner.browser.wait().await {
        warn!("Browser wait failed: {e}");
    }
    inner.handler.abort();

    // Chrome must have exited before the profile dir is removable.
    if let Err(e) = std::fs::remove_dir_all(&inner.user_data_dir) {
        warn!(
            "Failed to clean up profile dir {}: {}",
            inner.user_data_dir.display(),
            e
        );
    }
}
