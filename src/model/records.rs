//! Record types shared by both fetch stages and the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which transport produced a fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Http,
    Browser,
}

/// Pipeline stage of an attempt: cheap HTTP first, browser as fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    Primary,
    Fallback,
}

/// Final status taxonomy for a per-URL outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    CaptchaDetected,
    RobotsBlocked,
    HttpError,
    Timeout,
    InvalidUrl,
    TooLarge,
    OtherError,
}

impl FetchStatus {
    /// Statuses that count against the batch guardrail.
    #[must_use]
    pub const fn is_guardrail_bad(self) -> bool {
        matches!(
            self,
            Self::CaptchaDetected | Self::HttpError | Self::Timeout
        )
    }
}

/// In-memory result of one stage attempt.
///
/// May carry the response body for the router's completeness check; the
/// body never reaches disk because [`UrlRecord`] has no field for it.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub host: String,
    pub method: FetchMethod,
    pub stage: FetchStage,
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub latency_ms: Option<u64>,
    pub content_length: Option<u64>,
    pub encoding: Option<String>,
    pub retries: u32,
    pub captcha_detected: bool,
    pub robots_disallowed: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub shard_index: usize,
    pub body: Option<String>,
}

impl FetchRecord {
    /// Skeleton record for an attempt that has not touched the network.
    #[must_use]
    pub fn bare(url: &str, host: &str, method: FetchMethod, stage: FetchStage) -> Self {
        Self {
            url: url.to_string(),
            host: host.to_string(),
            method,
            stage,
            status: FetchStatus::OtherError,
            http_status: None,
            latency_ms: None,
            content_length: None,
            encoding: None,
            retries: 0,
            captcha_detected: false,
            robots_disallowed: false,
            error_kind: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            shard_index: 0,
            body: None,
        }
    }

    /// Convert into the persisted form, dropping the body and collapsing
    /// the start/finish pair into a single finish timestamp.
    #[must_use]
    pub fn into_url_record(self) -> UrlRecord {
        let timestamp = self.finished_at.unwrap_or_else(Utc::now);
        UrlRecord {
            url: self.url,
            host: self.host,
            method: self.method,
            stage: self.stage,
            status: self.status,
            http_status: self.http_status,
            latency_ms: self.latency_ms,
            content_length: self.content_length,
            encoding: self.encoding,
            retries: self.retries,
            captcha_detected: self.captcha_detected,
            robots_disallowed: self.robots_disallowed,
            error_kind: self.error_kind,
            error_message: self.error_message,
            shard_index: self.shard_index,
            timestamp,
        }
    }
}

/// Persisted per-URL outcome, one JSONL line in the records file.
///
/// Readers must tolerate unknown fields; the schema is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub host: String,
    pub method: FetchMethod,
    pub stage: FetchStage,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub captcha_detected: bool,
    #[serde(default)]
    pub robots_disallowed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub shard_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated outcome of one batch run.
///
/// Schema is append-only: new fields may be added, existing fields are
/// never renamed or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_urls: u64,
    pub success_rate: f64,
    pub http_error_rate: f64,
    pub timeout_rate: f64,
    pub captcha_rate: f64,
    pub robots_block_rate: f64,
    pub http_share: f64,
    pub browser_share: f64,
    pub http_latency_p50_ms: Option<u64>,
    pub http_latency_p95_ms: Option<u64>,
    pub browser_latency_p50_ms: Option<u64>,
    pub browser_latency_p95_ms: Option<u64>,
    pub http_mean_content_length: Option<u64>,
    pub browser_mean_content_length: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aborted: Option<String>,
}

/// Lifecycle of one shard in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-shard progress journal, written after every completed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardCheckpoint {
    pub run_id: String,
    pub shard_id: usize,
    pub urls_total: usize,
    pub urls_done: usize,
    pub last_updated_at: DateTime<Utc>,
    pub status: CheckpointStatus,
}

impl ShardCheckpoint {
    #[must_use]
    pub fn fresh(run_id: &str, shard_id: usize, urls_total: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            shard_id,
            urls_total,
            urls_done: 0,
            last_updated_at: Utc::now(),
            status: CheckpointStatus::Pending,
        }
    }
}
