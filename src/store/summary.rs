//! Run summary persistence.

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::RunSummary;

use super::checkpoint::write_json_atomic;

/// Atomically replace the run summary file.
///
/// Called at normal completion and on guardrail abort, so a summary is
/// present and well-formed at any termination.
pub async fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    write_json_atomic(path, summary).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary() -> RunSummary {
        RunSummary {
            run_id: "r1".to_string(),
            generated_at: Utc::now(),
            total_urls: 2,
            success_rate: 1.0,
            http_error_rate: 0.0,
            timeout_rate: 0.0,
            captcha_rate: 0.0,
            robots_block_rate: 0.0,
            http_share: 1.0,
            browser_share: 0.0,
            http_latency_p50_ms: Some(120),
            http_latency_p95_ms: Some(450),
            browser_latency_p50_ms: None,
            browser_latency_p95_ms: None,
            http_mean_content_length: Some(2048),
            browser_mean_content_length: None,
            duration_ms: 10_000,
            aborted: None,
        }
    }

    #[tokio::test]
    async fn summary_replaces_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_summary.json");

        write_summary(&path, &summary()).await.expect("write");
        let mut second = summary();
        second.total_urls = 99;
        write_summary(&path, &second).await.expect("replace");

        let raw = std::fs::read_to_string(&path).expect("read");
        let loaded: RunSummary = serde_json::from_str(&raw).expect("parse");
        assert_eq!(loaded.total_urls, 99);
        assert!(raw.contains("http_latency_p50_ms"));
    }
}
