//! Per-shard checkpoint journal.
//!
//! One JSON file per shard per run under
//! `checkpoints/{run_id}_shard_{shard_id}.json`, replaced atomically
//! (write temp, rename) so a crash can never leave a partial file. Read at
//! shard start to skip completed shards and resume interrupted ones.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::ShardCheckpoint;

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, run_id: &str, shard_id: usize) -> PathBuf {
        self.dir.join(format!("{run_id}_shard_{shard_id}.json"))
    }

    /// Load a shard's checkpoint, if a readable one exists. Corrupt files
    /// are treated as absent: the shard simply re-runs.
    pub async fn load(&self, run_id: &str, shard_id: usize) -> Option<ShardCheckpoint> {
        let path = self.path_for(run_id, shard_id);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("Corrupt checkpoint {}, ignoring: {e}", path.display());
                None
            }
        }
    }

    /// Persist a checkpoint atomically.
    pub async fn save(&self, checkpoint: &ShardCheckpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(&checkpoint.run_id, checkpoint.shard_id);
        write_json_atomic(&path, checkpoint).await
    }

    /// Update progress after one completed URL.
    ///
    /// Never sets `Completed`: the shard runner writes that marker itself,
    /// strictly after flushing the result store, so a completed checkpoint
    /// on disk always implies the shard's records are on disk too. Setting
    /// it here would race the buffered record tail on a shard's last URL.
    pub async fn record_progress(
        &self,
        checkpoint: &mut ShardCheckpoint,
        urls_done: usize,
    ) -> Result<()> {
        checkpoint.urls_done = urls_done;
        checkpoint.last_updated_at = Utc::now();
        self.save(checkpoint).await
    }
}

/// Serialize `value` and replace `path` atomically.
pub(crate) async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to rename into {}", path.display()))?;
    Ok(())
}
