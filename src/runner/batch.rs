//! Batch runner: splits the input into shards, drives them in order with
//! shared collaborators, enforces the bad-rate guardrail, and writes the
//! run summary.
//!
//! The run id is journaled under the data directory so an interrupted
//! process resumes the same run (same checkpoints, same records file) on
//! restart; the journal is cleared when a run completes or aborts.

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::browser::{BrowserFetcher, BrowserHandle};
use crate::config::Config;
use crate::http_fetcher::{HttpFetcher, build_transport};
use crate::metrics;
use crate::model::{RunSummary, load_url_file, split_into_shards};
use crate::robots::RobotsCache;
use crate::router::{FallbackFetch, StrategyRouter};
use crate::scheduler::DomainScheduler;
use crate::stealth::SessionStore;
use crate::store::{CheckpointStore, ResultStore, write_summary};
use crate::utils::GUARDRAIL_BAD_RATE;

use super::shard::run_shard;

/// Output artifact locations of one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub records: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunJournal {
    run_id: String,
    urls_file: PathBuf,
}

/// Drives a whole batch: input to artifacts.
pub struct BatchRunner {
    config: Config,
}

impl BatchRunner {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the batch over the URLs in `urls_file`. Returns the summary,
    /// which is also persisted; a summary is written at every
    /// termination, including guardrail aborts.
    pub async fn run(&self, urls_file: &Path) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        let run_id = self.resume_or_start_run(urls_file).await?;
        info!("Batch run {run_id} starting");

        // 1-2. Load input and shard it. Structural validation happens in
        // the router so invalid URLs still produce their record.
        let urls = load_url_file(urls_file).await?;
        if urls.is_empty() {
            anyhow::bail!("URL file {} contains no URLs", urls_file.display());
        }
        let shards = split_into_shards(&urls, config.shard_size);
        info!(
            "Loaded {} URLs into {} shards of <= {}",
            urls.len(),
            shards.len(),
            config.shard_size
        );

        // 3. Shared collaborators for the whole batch.
        let transport = build_transport(config)?;
        let robots = Arc::new(RobotsCache::new(transport.clone()));
        let scheduler = Arc::new(DomainScheduler::new(
            config.global_concurrency,
            config.per_host_concurrency,
            config.host_overrides.clone(),
            config.jitter_range_secs,
        ));
        let http = Arc::new(HttpFetcher::new(
            transport,
            Arc::clone(&robots),
            Arc::clone(&scheduler),
            config,
        ));
        let checkpoints = CheckpointStore::new(config.checkpoints_dir());
        let mut results = ResultStore::new(config.records_path(), config.record_buffer);
        let session_store = Arc::new(SessionStore::new(config.sessions_dir()));

        // Records already on disk (resumed run) are never re-fetched.
        let already_done: HashSet<String> = ResultStore::read_all(&config.records_path())
            .await?
            .into_iter()
            .map(|r| r.url)
            .collect();
        if !already_done.is_empty() {
            info!("Resuming: {} URLs already recorded", already_done.len());
        }

        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| format!("run-{run_id}"));
        let proxy_region = config.proxy.as_ref().and_then(|p| p.region.clone());

        // 4. Iterate shards in order, one browser handle per shard.
        let mut guardrail_tripped = false;
        let mut aborted: Option<String> = None;

        for (shard_id, shard_jobs) in shards.into_iter().enumerate() {
            let browser = self
                .shard_browser(
                    &session_store,
                    &session_id,
                    proxy_region.as_deref(),
                    &scheduler,
                )
                .await;

            let router = Arc::new(StrategyRouter::new(
                Arc::clone(&http),
                browser
                    .as_ref()
                    .map(|(fetcher, _)| Arc::clone(fetcher) as Arc<dyn FallbackFetch>),
                config.thin_content_bytes,
            ));

            let shard_records = run_shard(
                &run_id,
                shard_id,
                shard_jobs,
                router,
                &mut results,
                &checkpoints,
                scheduler.global_limit(),
                &already_done,
            )
            .await?;

            if let Some((_, handle)) = browser {
                handle.shutdown().await;
            }

            // 40% bad-status guardrail over each completed shard: halve
            // once, abort on the second consecutive trip.
            if !shard_records.is_empty() {
                let bad = metrics::bad_rate(&shard_records);
                if bad > GUARDRAIL_BAD_RATE {
                    if guardrail_tripped {
                        aborted = Some(format!(
                            "guardrail: bad-status rate {:.0}% in consecutive shards, run aborted at shard {shard_id}",
                            bad * 100.0
                        ));
                        error!("{}", aborted.as_deref().unwrap_or_default());
                        break;
                    }
                    warn!(
                        "Guardrail: bad-status rate {:.0}% in shard {shard_id}, halving concurrency",
                        bad * 100.0
                    );
                    scheduler.halve_global();
                    guardrail_tripped = true;
                } else {
                    guardrail_tripped = false;
                }
            }
        }

        // 5. Aggregate everything on disk and write the summary.
        results.close().await?;
        let all_records = ResultStore::read_all(&config.records_path()).await?;
        let summary = metrics::aggregate(
            &run_id,
            &all_records,
            started.elapsed().as_millis() as u64,
            aborted,
        );
        write_summary(&config.summary_path(), &summary).await?;
        self.clear_run_journal().await;

        info!(
            "Batch run {run_id} finished: {} records, success rate {:.1}%",
            summary.total_urls,
            summary.success_rate * 100.0
        );
        Ok(summary)
    }

    /// Launch the shard's browser and wire up its fetcher. Launch failure
    /// degrades the shard to HTTP-only rather than failing the batch.
    async fn shard_browser(
        &self,
        session_store: &Arc<SessionStore>,
        session_id: &str,
        proxy_region: Option<&str>,
        scheduler: &Arc<DomainScheduler>,
    ) -> Option<(Arc<BrowserFetcher>, Arc<BrowserHandle>)> {
        let config = &self.config;
        if !config.browser_enabled {
            return None;
        }

        let session = match session_store.load_or_create(session_id, proxy_region).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Session store unavailable: {e:#}");
                return None;
            }
        };

        match BrowserHandle::launch(
            config.browser_headless,
            &session.profile.user_agent,
            (
                session.profile.viewport_width,
                session.profile.viewport_height,
            ),
            config.browser_recycle_after,
        )
        .await
        {
            Ok(handle) => {
                let handle = Arc::new(handle);
                let fetcher = Arc::new(BrowserFetcher::new(
                    Arc::clone(&handle),
                    Arc::clone(scheduler),
                    session,
                    Some(Arc::clone(session_store)),
                    config,
                ));
                Some((fetcher, handle))
            }
            Err(e) => {
                warn!("Browser launch failed, shard runs HTTP-only: {e:#}");
                None
            }
        }
    }

    /// Reuse the journaled run id when resuming; mint and journal a fresh
    /// one otherwise.
    async fn resume_or_start_run(&self, urls_file: &Path) -> Result<String> {
        let journal_path = self.run_journal_path();

        if let Ok(raw) = tokio::fs::read_to_string(&journal_path).await
            && let Ok(journal) = serde_json::from_str::<RunJournal>(&raw)
        {
            if journal.urls_file.as_path() == urls_file {
                info!("Resuming run {} from journal", journal.run_id);
                return Ok(journal.run_id);
            }
            warn!(
                "Run journal points at {}, input is {}; starting a fresh run",
                journal.urls_file.display(),
                urls_file.display()
            );
        }

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let journal = RunJournal {
            run_id: run_id.clone(),
            urls_file: urls_file.to_path_buf(),
        };
        tokio::fs::write(&journal_path, serde_json::to_vec_pretty(&journal)?)
            .await
            .with_context(|| format!("Failed to write {}", journal_path.display()))?;
        Ok(run_id)
    }

    async fn clear_run_journal(&self) {
        let path = self.run_journal_path();
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Could not clear run journal {}: {e}", path.display());
        }
    }

    fn run_journal_path(&self) -> PathBuf {
        self.config.data_dir.join("current_run.json")
    }

    /// Artifact locations for this configuration.
    #[must_use]
    pub fn paths(&self) -> RunPaths {
        RunPaths {
            records: self.config.records_path(),
            summary: self.config.summary_path(),
        }
    }
}
