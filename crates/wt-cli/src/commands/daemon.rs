//! Long-running reaper host.

use std::sync::Arc;

use anyhow::{Context, Result};
use wt_core::StaleSessionReaper;

/// Runs periodic sweeps until Ctrl-C.
pub fn run(reaper: Arc<StaleSessionReaper>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let handle = reaper.spawn();
        tracing::info!("daemon running, press Ctrl-C to stop");
        let signal = tokio::signal::ctrl_c().await;
        handle.shutdown().await;
        signal.context("failed to listen for Ctrl-C")
    })
}
