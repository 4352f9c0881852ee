//! Metrics aggregation: per-URL records in, one run summary out.
//!
//! Rates are fractions over the total URL count (invalid URLs included in
//! the denominator). Method shares exclude records that never attempted
//! the network, so they may sum below 1. Percentiles use the
//! nearest-rank-on-sorted-sample convention described on the summary
//! fields themselves.

use chrono::Utc;

use crate::model::{FetchMethod, FetchStatus, RunSummary, UrlRecord};

/// Aggregate all records of a run into the summary.
#[must_use]
pub fn aggregate(
    run_id: &str,
    records: &[UrlRecord],
    duration_ms: u64,
    aborted: Option<String>,
) -> RunSummary {
    let total = records.len() as u64;

    let rate = |status: FetchStatus| -> f64 {
        if total == 0 {
            return 0.0;
        }
        records.iter().filter(|r| r.status == status).count() as f64 / total as f64
    };

    // Records that never attempted the network carry no method share.
    let share = |method: FetchMethod| -> f64 {
        if total == 0 {
            return 0.0;
        }
        records
            .iter()
            .filter(|r| r.method == method && r.status != FetchStatus::InvalidUrl)
            .count() as f64
            / total as f64
    };

    let latencies = |method: FetchMethod| -> Vec<u64> {
        let mut sample: Vec<u64> = records
            .iter()
            .filter(|r| r.method == method)
            .filter_map(|r| r.latency_ms)
            .collect();
        sample.sort_unstable();
        sample
    };

    let http_latencies = latencies(FetchMethod::Http);
    let browser_latencies = latencies(FetchMethod::Browser);

    RunSummary {
        run_id: run_id.to_string(),
        generated_at: Utc::now(),
        total_urls: total,
        success_rate: rate(FetchStatus::Success),
        http_error_rate: rate(FetchStatus::HttpError),
        timeout_rate: rate(FetchStatus::Timeout),
        captcha_rate: rate(FetchStatus::CaptchaDetected),
        robots_block_rate: rate(FetchStatus::RobotsBlocked),
        http_share: share(FetchMethod::Http),
        browser_share: share(FetchMethod::Browser),
        http_latency_p50_ms: percentile(&http_latencies, 50.0),
        http_latency_p95_ms: percentile(&http_latencies, 95.0),
        browser_latency_p50_ms: percentile(&browser_latencies, 50.0),
        browser_latency_p95_ms: percentile(&browser_latencies, 95.0),
        http_mean_content_length: mean_content_length(records, FetchMethod::Http),
        browser_mean_content_length: mean_content_length(records, FetchMethod::Browser),
        duration_ms,
        aborted,
    }
}

/// Nearest-rank percentile over a sorted sample:
/// `index = round(p/100 * (n-1))` clamped to `[0, n-1]`; `None` on empty.
#[must_use]
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let raw = (p / 100.0 * (sorted.len() - 1) as f64).round();
    let index = (raw.max(0.0) as usize).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Integer mean content length over a method's positive-length rows.
fn mean_content_length(records: &[UrlRecord], method: FetchMethod) -> Option<u64> {
    let sample: Vec<u64> = records
        .iter()
        .filter(|r| r.method == method)
        .filter_map(|r| r.content_length)
        .filter(|&len| len > 0)
        .collect();
    if sample.is_empty() {
        return None;
    }
    Some(sample.iter().sum::<u64>() / sample.len() as u64)
}

/// Combined bad-status rate used by the batch guardrail.
#[must_use]
pub fn bad_rate(records: &[UrlRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records
        .iter()
        .filter(|r| r.status.is_guardrail_bad())
        .count() as f64
        / records.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchRecord, FetchStage};

    fn record(
        method: FetchMethod,
        status: FetchStatus,
        latency_ms: Option<u64>,
        content_length: Option<u64>,
    ) -> UrlRecord {
        let mut r = FetchRecord::bare("https://x.test/", "x.test", method, FetchStage::Primary);
        r.status = status;
        r.latency_ms = latency_ms;
        r.content_length = content_length;
        r.into_url_record()
    }

    #[test]
    fn percentile_formula() {
        let sample = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&sample, 50.0), Some(30));
        assert_eq!(percentile(&sample, 0.0), Some(10));
        assert_eq!(percentile(&sample, 100.0), Some(50));
        // round(0.95 * 4) = 4
        assert_eq!(percentile(&sample, 95.0), Some(50));
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7], 95.0), Some(7));
    }

    #[test]
    fn rates_sum_within_unit_interval() {
        let records = vec![
            record(FetchMethod::Http, FetchStatus::Success, Some(100), Some(2048)),
            record(FetchMethod::Http, FetchStatus::HttpError, Some(80), None),
            record(FetchMethod::Browser, FetchStatus::Success, Some(900), Some(50_000)),
            record(FetchMethod::Http, FetchStatus::InvalidUrl, None, None),
        ];
        let summary = aggregate("r1", &records, 1000, None);

        let rate_sum = summary.success_rate
            + summary.http_error_rate
            + summary.timeout_rate
            + summary.captcha_rate
            + summary.robots_block_rate;
        assert!(rate_sum >= 0.0 && rate_sum <= 1.0);
        assert!(summary.http_share + summary.browser_share <= 1.0);
        // invalid_url counts toward total but not toward any method share.
        assert_eq!(summary.total_urls, 4);
        assert!((summary.http_share - 0.5).abs() < 1e-9);
        assert!((summary.browser_share - 0.25).abs() < 1e-9);
    }

    #[test]
    fn per_method_latency_is_isolated() {
        let records = vec![
            record(FetchMethod::Http, FetchStatus::Success, Some(100), Some(1)),
            record(FetchMethod::Http, FetchStatus::Success, Some(200), Some(1)),
            record(FetchMethod::Browser, FetchStatus::Success, Some(5000), Some(1)),
        ];
        let summary = aggregate("r1", &records, 1000, None);
        assert_eq!(summary.http_latency_p50_ms, Some(200));
        assert_eq!(summary.browser_latency_p50_ms, Some(5000));
        assert_eq!(summary.browser_latency_p95_ms, Some(5000));
    }

    #[test]
    fn no_latency_rows_yield_null() {
        let records = vec![record(FetchMethod::Http, FetchStatus::Success, None, None)];
        let summary = aggregate("r1", &records, 1000, None);
        assert_eq!(summary.http_latency_p50_ms, None);
        assert_eq!(summary.browser_latency_p50_ms, None);
        assert_eq!(summary.http_mean_content_length, None);
    }

    #[test]
    fn mean_skips_zero_length_rows() {
        let records = vec![
            record(FetchMethod::Http, FetchStatus::Success, Some(10), Some(1000)),
            record(FetchMethod::Http, FetchStatus::Success, Some(10), Some(3000)),
            record(FetchMethod::Http, FetchStatus::HttpError, Some(10), Some(0)),
        ];
        let summary = aggregate("r1", &records, 1000, None);
        assert_eq!(summary.http_mean_content_length, Some(2000));
    }

    #[test]
    fn empty_run_is_all_zero() {
        let summary = aggregate("r1", &[], 5, Some("aborted: guardrail".to_string()));
        assert_eq!(summary.total_urls, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.aborted.as_deref(), Some("aborted: guardrail"));
    }

    #[test]
    fn bad_rate_counts_guardrail_statuses() {
        let records = vec![
            record(FetchMethod::Http, FetchStatus::Success, None, None),
            record(FetchMethod::Http, FetchStatus::Timeout, None, None),
            record(FetchMethod::Http, FetchStatus::CaptchaDetected, None, None),
            record(FetchMethod::Http, FetchStatus::HttpError, None, None),
        ];
        assert!((bad_rate(&records) - 0.75).abs() < 1e-9);
        assert_eq!(bad_rate(&[]), 0.0);
    }
}
