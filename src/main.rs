//! Batch entry point.
//!
//! Usage: `dragnet [urls-file]`. The positional argument overrides
//! `DATA_DIR/urls.txt`. Environment is read through `Config::from_env`;
//! the summary JSON is printed to stdout on success and the process exits
//! non-zero on unrecoverable failure (missing inputs, malformed config).

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dragnet::{BatchRunner, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // The fmt subscriber's tracing-log bridge also claims the `log`
    // facade, so the log-macro call sites land in the same output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;

    let urls_file = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_dir.join("urls.txt"));

    if !urls_file.exists() {
        anyhow::bail!("URL file not found: {}", urls_file.display());
    }

    let runner = BatchRunner::new(config);
    let summary = runner.run(&urls_file).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
