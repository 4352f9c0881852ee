//! Guardrail behavior: a high bad-status rate halves concurrency once and
//! aborts on the second consecutive trip, always leaving a well-formed
//! partial summary behind.

use std::path::PathBuf;

use dragnet::config::Config;
use dragnet::model::FetchStatus;
use dragnet::runner::BatchRunner;
use dragnet::store::ResultStore;

#[tokio::test]
async fn consecutive_bad_shards_abort_with_partial_summary() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    // Every page is a hard 404: not retried, all http_error.
    let _pages = server
        .mock("GET", mockito::Matcher::Regex(r"^/page/\d+$".to_string()))
        .with_status(404)
        .with_body("gone")
        .create_async()
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.shard_size = 2;
    config.browser_enabled = false;
    config.jitter_range_secs = None;
    let config = config;

    let urls: Vec<String> = (0..6).map(|i| format!("{}/page/{i}", server.url())).collect();
    let urls_file: PathBuf = dir.path().join("urls.txt");
    tokio::fs::write(&urls_file, urls.join("\n")).await.expect("write urls");

    let runner = BatchRunner::new(config.clone());
    let summary = runner.run(&urls_file).await.expect("aborted run still returns");

    // Shard 0 trips (halve), shard 1 trips again (abort): shard 2 never ran.
    let note = summary.aborted.as_deref().expect("aborted note present");
    assert!(note.contains("guardrail"), "unexpected note: {note}");
    assert_eq!(summary.total_urls, 4, "only two shards produced records");
    assert_eq!(summary.success_rate, 0.0);
    assert!((summary.http_error_rate - 1.0).abs() < 1e-9);

    let records = ResultStore::read_all(&config.records_path())
        .await
        .expect("read records");
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status == FetchStatus::HttpError));

    // The summary artifact is present and well-formed on disk.
    let raw = tokio::fs::read_to_string(config.summary_path())
        .await
        .expect("summary exists");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid JSON");
    assert!(parsed["aborted"].is_string());
}
