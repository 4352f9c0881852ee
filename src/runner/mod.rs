//! Shard and batch execution.

mod batch;
mod shard;

pub use batch::{BatchRunner, RunPaths};
pub use shard::run_shard;
