//! URL jobs, input loading and sharding.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// One URL to be processed, enriched with shard coordinates.
///
/// Immutable once created; identity is the URL itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlJob {
    pub url: String,
    pub shard_index: usize,
    pub position_in_shard: usize,
    /// Loader hint that the page is known to need JavaScript; the router
    /// still attempts the cheap HTTP stage first but escalates to the
    /// browser regardless of what it returns.
    #[serde(default)]
    pub hint_dynamic: bool,
}

/// Load URLs from a line-delimited or single-column CSV file.
///
/// Blank lines are ignored. A canonical line-delimited copy is written
/// next to the input on first use so later runs (and the notebook) read
/// one normalized form.
pub async fn load_url_file(path: &Path) -> Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;

    let urls: Vec<String> = raw
        .lines()
        .map(|line| line.trim().trim_matches('"'))
        .map(|line| line.strip_suffix(',').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case("url")) // CSV header
        .map(ToString::to_string)
        .collect();

    info!(count = urls.len(), file = %path.display(), "Loaded input URLs");

    let canonical = path.with_extension("canonical.txt");
    if !canonical.exists() {
        let joined = urls.join("\n") + "\n";
        if let Err(e) = tokio::fs::write(&canonical, joined).await {
            debug!("Could not write canonical URL list: {e}");
        }
    }

    Ok(urls)
}

/// Split validated URLs into shards of `shard_size`, assigning coordinates.
///
/// Order is preserved: shard k holds input positions [k*size, (k+1)*size).
#[must_use]
pub fn split_into_shards(urls: &[String], shard_size: usize) -> Vec<Vec<UrlJob>> {
    let shard_size = shard_size.max(1);
    urls.chunks(shard_size)
        .enumerate()
        .map(|(shard_index, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(|(position_in_shard, url)| UrlJob {
                    url: url.clone(),
                    shard_index,
                    position_in_shard,
                    hint_dynamic: false,
                })
                .collect()
        })
        .collect()
}
