//! `tzindex run`: follow a node and index its chain into memory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tzindex_core::{IndexRegistry, IndexerError};
use tzindex_crawler::{Crawler, CrawlerConfig, CrawlerEvent, LedgerRegistry, SnapshotHook};
use tzindex_rpc::{HttpClient, Node};
use tzindex_storage::{standard_indexes, MemoryStore};

/// Blocks between progress log lines.
const PROGRESS_EVERY: i64 = 1_000;

// ─── Snapshot hook ───────────────────────────────────────────────────────────

/// Writes table row counts to `<dir>/stats-<height>.json`.
pub struct StatsSnapshot {
    store: Arc<MemoryStore>,
}

impl StatsSnapshot {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotHook for StatsSnapshot {
    async fn snapshot(&self, height: i64, dir: &Path) -> Result<(), IndexerError> {
        let body = json!({ "height": height, "stats": self.store.stats() });
        let body = serde_json::to_vec_pretty(&body).map_err(|e| IndexerError::Other(e.to_string()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        tokio::fs::write(dir.join(format!("stats-{height}.json")), body)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn run(rpc_url: &str, config: CrawlerConfig) -> Result<()> {
    let client = HttpClient::with_defaults(rpc_url)
        .with_context(|| format!("creating RPC client for '{rpc_url}'"))?;
    let node = Arc::new(Node::new(Arc::new(client)));
    let store = Arc::new(MemoryStore::new());

    let mut registry: LedgerRegistry =
        IndexRegistry::new(config.chain_id.clone(), store.clone()).with_tx(store.clone());
    for index in standard_indexes(&store) {
        registry.register(index)?;
    }

    let mut crawler = Crawler::new(config, node, store.clone(), registry)
        .with_snapshot_hook(Arc::new(StatsSnapshot::new(store.clone())));

    let stop = crawler.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current block");
            stop.cancel();
        }
    });

    let progress = tokio::spawn(report_progress(crawler.subscribe(), store.clone()));
    let result = crawler.run().await;
    progress.abort();

    tracing::info!(state = %crawler.state(), stats = %store.stats(), "Indexer exited");
    result.context("crawler stopped with an error")
}

async fn report_progress(
    mut events: tokio::sync::broadcast::Receiver<CrawlerEvent>,
    store: Arc<MemoryStore>,
) {
    loop {
        match events.recv().await {
            Ok(CrawlerEvent::BlockConnected { height, cycle, .. }) if height % PROGRESS_EVERY == 0 => {
                tracing::info!(height, cycle, stats = %store.stats(), "Progress");
            }
            Ok(CrawlerEvent::Stopped { .. }) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress reporter lagged");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_writes_stats_file() {
        let dir = tempfile::tempdir().unwrap();
        let hook = StatsSnapshot::new(Arc::new(MemoryStore::new()));

        hook.snapshot(42, &dir.path().join("snap")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("snap").join("stats-42.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["height"], 42);
        assert_eq!(value["stats"]["blocks"], 0);
    }
}
