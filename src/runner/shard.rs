//! Shard runner: bounded-concurrency fan-out over one shard's jobs with a
//! checkpoint journal.
//!
//! The runner never aborts on a single URL: the router is infallible by
//! contract and task panics are converted into `other_error` records. The
//! result store is flushed before a shard is marked completed, so a
//! `completed` checkpoint always implies the shard's records are on disk.

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::model::{
    CheckpointStatus, FetchMethod, FetchRecord, FetchStage, FetchStatus, ShardCheckpoint, UrlJob,
    UrlRecord,
};
use crate::router::StrategyRouter;
use crate::store::{CheckpointStore, ResultStore};
use crate::utils::extract_host;

/// Run one shard to completion.
///
/// `already_done` holds URLs that already have a record on disk (from a
/// prior interrupted run); their jobs are skipped so each URL appears in
/// the records file exactly once. Returns the records emitted by this
/// invocation, in completion order.
pub async fn run_shard(
    run_id: &str,
    shard_id: usize,
    jobs: Vec<UrlJob>,
    router: Arc<StrategyRouter>,
    results: &mut ResultStore,
    checkpoints: &CheckpointStore,
    concurrency: usize,
    already_done: &HashSet<String>,
) -> Result<Vec<UrlRecord>> {
    if let Some(checkpoint) = checkpoints.load(run_id, shard_id).await
        && checkpoint.status == CheckpointStatus::Completed
    {
        info!("Shard {shard_id} already completed, skipping");
        return Ok(Vec::new());
    }

    let total = jobs.len();
    let pending: VecDeque<UrlJob> = jobs
        .into_iter()
        .filter(|job| !already_done.contains(&job.url))
        .collect();

    let mut checkpoint = ShardCheckpoint::fresh(run_id, shard_id, total);
    checkpoint.status = CheckpointStatus::InProgress;
    checkpoint.urls_done = total - pending.len();
    checkpoints.save(&checkpoint).await?;

    if checkpoint.urls_done > 0 {
        info!(
            "Shard {shard_id}: resuming, {} of {total} URLs already recorded",
            checkpoint.urls_done
        );
    }

    let mut queue = pending;
    let mut active = FuturesUnordered::new();
    let mut emitted = Vec::new();
    let mut urls_done = checkpoint.urls_done;
    let concurrency = concurrency.max(1);

    loop {
        while active.len() < concurrency {
            let Some(job) = queue.pop_front() else {
                break;
            };
            let router = Arc::clone(&router);
            active.push(tokio::spawn(async move {
                // A panic below the router is a bug, but it still costs
                // exactly one record, never the shard.
                match AssertUnwindSafe(router.route_and_fetch(&job))
                    .catch_unwind()
                    .await
                {
                    Ok(record) => record,
                    Err(_) => panic_record(&job),
                }
            }));
        }

        match active.next().await {
            Some(Ok(record)) => {
                debug!("Shard {shard_id}: completed {}", record.host);
                results.write(record.clone()).await?;
                emitted.push(record);
                urls_done += 1;
                checkpoints
                    .record_progress(&mut checkpoint, urls_done)
                    .await?;
            }
            Some(Err(e)) => {
                // Task cancelled from outside; nothing to record.
                warn!("Shard {shard_id}: task join error: {e}");
            }
            None => break,
        }

        if queue.is_empty() && active.is_empty() {
            break;
        }
    }

    // Flush before the completed marker: a completed checkpoint must never
    // claim records the disk does not have.
    results.flush().await?;
    checkpoint.status = CheckpointStatus::Completed;
    checkpoint.urls_done = total;
    checkpoint.last_updated_at = Utc::now();
    checkpoints.save(&checkpoint).await?;

    info!(
        "Shard {shard_id} completed: {} records this run, {total} total",
        emitted.len()
    );
    Ok(emitted)
}

fn panic_record(job: &UrlJob) -> UrlRecord {
    let mut record = FetchRecord::bare(
        &job.url,
        &extract_host(&job.url).unwrap_or_default(),
        FetchMethod::Http,
        FetchStage::Primary,
    );
    record.shard_index = job.shard_index;
    record.status = FetchStatus::OtherError;
    record.error_kind = Some("Panic".to_string());
    record.error_message = Some("fetch task panicked".to_string());
    record.finished_at = Some(Utc::now());
    record.into_url_record()
}
