pub mod automation;
pub mod backfill;
pub mod config;
pub mod daemon;
pub mod init;
pub mod job;
pub mod rate_limit;
pub mod schedule;
pub mod serve;

use adpilot_core::Engine;
use anyhow::Context;
use std::future::Future;
use std::path::Path;

pub fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    Engine::open(root).with_context(|| format!("failed to open project at {}", root.display()))
}

/// Drive one async engine call to completion on a fresh runtime.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    Ok(rt.block_on(fut))
}
