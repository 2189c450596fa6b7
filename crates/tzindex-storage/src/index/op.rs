//! Operation rows by height.

use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;

pub struct OpIndex {
    store: Arc<MemoryStore>,
}

impl OpIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for OpIndex {
    fn name(&self) -> &str {
        "Operation index"
    }

    fn key(&self) -> &str {
        "op"
    }

    fn tables(&self) -> Vec<String> {
        vec!["op".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn connect_block(&self, block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let height = block.height;
        let ops = ctx.ops.clone();
        self.store.write(move |t| {
            if ops.is_empty() {
                t.ops.remove(&height);
            } else {
                t.ops.insert(height, ops);
            }
        });
        Ok(())
    }

    // rows go in delete_block
    async fn disconnect_block(&self, _block: &Block, _ctx: &BlockBuilder) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.ops.remove(&height);
        });
        Ok(())
    }

    async fn delete_cycle(&self, _cycle: i64) -> Result<(), IndexerError> {
        Ok(())
    }
}
