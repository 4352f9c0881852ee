//! Property tests over the metrics aggregator: rate and share bounds hold
//! for arbitrary record populations.

use proptest::prelude::*;

use dragnet::metrics::aggregate;
use dragnet::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus, UrlRecord};

fn arb_status() -> impl Strategy<Value = FetchStatus> {
    prop_oneof![
        Just(FetchStatus::Success),
        Just(FetchStatus::CaptchaDetected),
        Just(FetchStatus::RobotsBlocked),
        Just(FetchStatus::HttpError),
        Just(FetchStatus::Timeout),
        Just(FetchStatus::InvalidUrl),
        Just(FetchStatus::TooLarge),
        Just(FetchStatus::OtherError),
    ]
}

fn arb_method() -> impl Strategy<Value = FetchMethod> {
    prop_oneof![Just(FetchMethod::Http), Just(FetchMethod::Browser)]
}

fn arb_record() -> impl Strategy<Value = UrlRecord> {
    (
        arb_status(),
        arb_method(),
        proptest::option::of(0u64..120_000),
        proptest::option::of(0u64..5_000_000),
        0usize..20,
    )
        .prop_map(|(status, method, latency_ms, content_length, shard)| {
            let mut record = FetchRecord::bare(
                &format!("https://host{shard}.test/p"),
                &format!("host{shard}.test"),
                method,
                FetchStage::Primary,
            );
            record.status = status;
            record.latency_ms = latency_ms;
            record.content_length = content_length;
            record.shard_index = shard;
            record.into_url_record()
        })
}

proptest! {
    #[test]
    fn rates_and_shares_stay_bounded(records in proptest::collection::vec(arb_record(), 0..200)) {
        let summary = aggregate("prop-run", &records, 1, None);

        let rate_sum = summary.success_rate
            + summary.http_error_rate
            + summary.timeout_rate
            + summary.captcha_rate
            + summary.robots_block_rate;
        prop_assert!(rate_sum >= 0.0);
        prop_assert!(rate_sum <= 1.0 + 1e-9);

        prop_assert!(summary.http_share + summary.browser_share <= 1.0 + 1e-9);
        prop_assert!(summary.http_share >= 0.0);
        prop_assert!(summary.browser_share >= 0.0);
        prop_assert_eq!(summary.total_urls, records.len() as u64);
    }

    #[test]
    fn percentiles_are_members_of_the_sample(records in proptest::collection::vec(arb_record(), 1..100)) {
        let summary = aggregate("prop-run", &records, 1, None);

        for (method, p50, p95) in [
            (FetchMethod::Http, summary.http_latency_p50_ms, summary.http_latency_p95_ms),
            (FetchMethod::Browser, summary.browser_latency_p50_ms, summary.browser_latency_p95_ms),
        ] {
            let sample: Vec<u64> = records
                .iter()
                .filter(|r| r.method == method)
                .filter_map(|r| r.latency_ms)
                .collect();
            if sample.is_empty() {
                prop_assert!(p50.is_none());
                prop_assert!(p95.is_none());
            } else {
                let p50 = p50.expect("p50 present when sample is");
                let p95 = p95.expect("p95 present when sample is");
                prop_assert!(sample.contains(&p50));
                prop_assert!(sample.contains(&p95));
                prop_assert!(p50 <= p95);
            }
        }
    }

    #[test]
    fn serialized_records_never_leak_bodies(records in proptest::collection::vec(arb_record(), 0..50)) {
        for record in &records {
            let json = serde_json::to_string(record).expect("serializes");
            prop_assert!(!json.contains("\"body\""));
        }
    }
}
