//! Block headers and their undo records.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;

pub struct BlockIndex {
    store: Arc<MemoryStore>,
    /// Undo records are kept for this many blocks below the tip, 0 keeps all.
    undo_depth: AtomicI64,
}

impl BlockIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            undo_depth: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for BlockIndex {
    fn name(&self) -> &str {
        "Block index"
    }

    fn key(&self) -> &str {
        "block"
    }

    fn tables(&self) -> Vec<String> {
        vec!["block".into(), "block_undo".into()]
    }

    async fn create(&self, opts: &IndexOptions) -> Result<(), IndexerError> {
        tracing::debug!(chain_id = %opts.chain_id, "Creating block tables");
        Ok(())
    }

    async fn init(&self, opts: &IndexOptions) -> Result<(), IndexerError> {
        self.undo_depth.store(opts.max_rollback_depth, Ordering::Relaxed);
        Ok(())
    }

    async fn connect_block(&self, block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let block = block.clone();
        let undo = ctx.undo.clone();
        self.store.write(move |t| {
            t.undo.insert(block.height, undo);
            t.blocks.insert(block.height, block);
        });
        Ok(())
    }

    async fn disconnect_block(&self, _block: &Block, _ctx: &BlockBuilder) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.blocks.remove(&height);
            t.undo.remove(&height);
        });
        Ok(())
    }

    async fn delete_cycle(&self, _cycle: i64) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Drop undo records below the rollback window.
    async fn finalize_sync(&self) -> Result<(), IndexerError> {
        let depth = self.undo_depth.load(Ordering::Relaxed);
        if depth <= 0 {
            return Ok(());
        }
        let Some(tip) = self.store.read(|t| t.blocks.keys().next_back().copied()) else {
            return Ok(());
        };
        let keep_from = tip - depth;
        self.store.write(move |t| {
            let before = t.undo.len();
            t.undo = t.undo.split_off(&keep_from);
            tracing::info!(tip, pruned = before - t.undo.len(), "Pruned undo records");
        });
        Ok(())
    }
}
