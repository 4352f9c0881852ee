//! Buffered appender for the per-URL records file.
//!
//! Records accumulate in memory and flush to disk as line-delimited JSON
//! when the buffer fills; `close()` flushes the tail. Not safe for
//! concurrent writers: the shard runner serializes all writes through one
//! instance.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::model::UrlRecord;

pub struct ResultStore {
    path: PathBuf,
    buffer: Vec<UrlRecord>,
    buffer_size: usize,
    written: u64,
}

impl ResultStore {
    /// Create a store appending to `path`. The parent directory is
    /// created on demand at first flush.
    #[must_use]
    pub fn new(path: PathBuf, buffer_size: usize) -> Self {
        Self {
            path,
            buffer: Vec::with_capacity(buffer_size.max(1)),
            buffer_size: buffer_size.max(1),
            written: 0,
        }
    }

    /// Append one record, flushing when the buffer is full.
    pub async fn write(&mut self, record: UrlRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush buffered records to disk.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut lines = String::new();
        for record in &self.buffer {
            // serde_json preserves non-ASCII as-is; output stays UTF-8.
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        self.written += self.buffer.len() as u64;
        debug!(
            "Flushed {} records ({} total) to {}",
            self.buffer.len(),
            self.written,
            self.path.display()
        );
        self.buffer.clear();
        Ok(())
    }

    /// Flush the tail and report the total written.
    pub async fn close(mut self) -> Result<u64> {
        self.flush().await?;
        Ok(self.written)
    }

    /// Records written to disk so far (excluding the in-memory tail).
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Read every record back from the file, tolerating unknown fields
    /// and skipping malformed lines.
    pub async fn read_all(path: &std::path::Path) -> Result<Vec<UrlRecord>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read records {}", path.display()));
            }
        };

        let mut records = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UrlRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping malformed record line: {e}"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchMethod, FetchRecord, FetchStage, FetchStatus};

    fn record(url: &str) -> UrlRecord {
        let mut r = FetchRecord::bare(url, "x.test", FetchMethod::Http, FetchStage::Primary);
        r.status = FetchStatus::Success;
        r.into_url_record()
    }

    #[tokio::test]
    async fn buffers_until_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out/stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 3);

        store.write(record("https://a.test/1")).await.expect("write");
        store.write(record("https://a.test/2")).await.expect("write");
        assert!(!path.exists(), "nothing on disk below the threshold");

        store.write(record("https://a.test/3")).await.expect("write");
        assert!(path.exists(), "third write triggers a flush");
        assert_eq!(store.written(), 3);
    }

    #[tokio::test]
    async fn close_flushes_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 100);
        store.write(record("https://a.test/only")).await.expect("write");
        let total = store.close().await.expect("close");
        assert_eq!(total, 1);

        let records = ResultStore::read_all(&path).await.expect("read back");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://a.test/only");
    }

    #[tokio::test]
    async fn non_ascii_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stats.jsonl");
        let mut store = ResultStore::new(path.clone(), 1);
        store
            .write(record("https://例え.テスト/ページ"))
            .await
            .expect("write");
        drop(store);

        let raw = tokio::fs::read_to_string(&path).await.expect("read");
        assert!(raw.contains("例え"), "non-ASCII preserved, not escaped");
    }

    #[tokio::test]
    async fn read_all_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let records = ResultStore::read_all(&dir.path().join("nope.jsonl"))
            .await
            .expect("read");
        assert!(records.is_empty());
    }
}
