//! Escalation decisions with a stubbed fallback stage: the router chooses
//! the browser exactly when the predicates hold, and a browser-stage
//! success supersedes the HTTP result as `method=browser, stage=fallback`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dragnet::config::Config;
use dragnet::http_fetcher::HttpFetcher;
use dragnet::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus, UrlJob};
use dragnet::robots::RobotsCache;
use dragnet::router::{FallbackFetch, StrategyRouter};
use dragnet::scheduler::DomainScheduler;

/// Fallback fixture answering a fixed-size success and counting calls.
struct StubBrowser {
    calls: AtomicUsize,
    content_length: u64,
}

#[async_trait]
impl FallbackFetch for StubBrowser {
    async fn fetch(&self, job: &UrlJob, stage: FetchStage) -> anyhow::Result<FetchRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut record = FetchRecord::bare(&job.url, "stub.test", FetchMethod::Browser, stage);
        record.status = FetchStatus::Success;
        record.content_length = Some(self.content_length);
        record.latency_ms = Some(1800);
        record.body = Some("x".repeat(self.content_length as usize));
        Ok(record)
    }
}

fn router_with_stub(
    client: reqwest::Client,
    stub: Arc<StubBrowser>,
) -> StrategyRouter {
    let config = Config::default();
    let scheduler = Arc::new(DomainScheduler::new(8, 4, Vec::new(), None));
    let robots = Arc::new(RobotsCache::new(client.clone()));
    let http = Arc::new(HttpFetcher::new(client, robots, scheduler, &config));
    StrategyRouter::new(http, Some(stub), config.thin_content_bytes)
}

fn job(url: &str) -> UrlJob {
    UrlJob {
        url: url.to_string(),
        shard_index: 0,
        position_in_shard: 0,
        hint_dynamic: false,
    }
}

#[tokio::test]
async fn thin_js_required_page_escalates_and_browser_supersedes() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    let _page = server
        .mock("GET", "/app")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Please enable JavaScript to use this app.</body></html>")
        .create_async()
        .await;

    let stub = Arc::new(StubBrowser {
        calls: AtomicUsize::new(0),
        content_length: 50_000,
    });
    let router = router_with_stub(reqwest::Client::new(), Arc::clone(&stub));

    let record = router
        .route_and_fetch(&job(&format!("{}/app", server.url())))
        .await;

    assert_eq!(stub.calls.load(Ordering::SeqCst), 1, "browser stage ran once");
    assert_eq!(record.method, FetchMethod::Browser);
    assert_eq!(record.stage, FetchStage::Fallback);
    assert_eq!(record.status, FetchStatus::Success);
    assert_eq!(record.content_length, Some(50_000));
}

#[tokio::test]
async fn complete_page_never_escalates() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    let body = format!("<html><body>{}</body></html>", "paragraph ".repeat(300));
    let _page = server
        .mock("GET", "/full")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&body)
        .create_async()
        .await;

    let stub = Arc::new(StubBrowser {
        calls: AtomicUsize::new(0),
        content_length: 50_000,
    });
    let router = router_with_stub(reqwest::Client::new(), Arc::clone(&stub));

    let record = router
        .route_and_fetch(&job(&format!("{}/full", server.url())))
        .await;

    assert_eq!(stub.calls.load(Ordering::SeqCst), 0, "no browser call");
    assert_eq!(record.method, FetchMethod::Http);
    assert_eq!(record.stage, FetchStage::Primary);
}

#[tokio::test]
async fn http_error_escalates() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    let _page = server
        .mock("GET", "/error")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let stub = Arc::new(StubBrowser {
        calls: AtomicUsize::new(0),
        content_length: 10_000,
    });
    let router = router_with_stub(reqwest::Client::new(), Arc::clone(&stub));

    let record = router
        .route_and_fetch(&job(&format!("{}/error", server.url())))
        .await;

    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.method, FetchMethod::Browser);
    assert_eq!(record.status, FetchStatus::Success);
}

#[tokio::test]
async fn dynamic_hint_forces_escalation() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    let body = format!("<html><body>{}</body></html>", "static shell ".repeat(300));
    let _page = server
        .mock("GET", "/spa")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&body)
        .create_async()
        .await;

    let stub = Arc::new(StubBrowser {
        calls: AtomicUsize::new(0),
        content_length: 80_000,
    });
    let router = router_with_stub(reqwest::Client::new(), Arc::clone(&stub));

    let mut hinted = job(&format!("{}/spa", server.url()));
    hinted.hint_dynamic = true;
    let record = router.route_and_fetch(&hinted).await;

    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.method, FetchMethod::Browser);
}
