use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::open_engine;

/// Execute the `serve` command: fire scheduled runs until Ctrl-C.
pub async fn execute(config_path: &Path) -> Result<()> {
    let engine = Arc::new(open_engine(config_path)?);

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            let _ = shutdown_tx.send(()).await;
        }
    });

    syncforge_engine::serve(engine, shutdown_rx)
        .await
        .context("Scheduler stopped with an error")
}
