//! Global constants.

use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;

pub struct ConstantIndex {
    store: Arc<MemoryStore>,
}

impl ConstantIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for ConstantIndex {
    fn name(&self) -> &str {
        "Constant index"
    }

    fn key(&self) -> &str {
        "constant"
    }

    fn tables(&self) -> Vec<String> {
        vec!["constant".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn connect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        if ctx.constants.is_empty() {
            return Ok(());
        }
        let constants = ctx.constants.clone();
        self.store.write(move |t| {
            for c in constants {
                t.constants.insert(c.address.clone(), c);
            }
        });
        Ok(())
    }

    async fn disconnect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let created = ctx.undo.constants_created.clone();
        self.store.write(move |t| {
            for addr in &created {
                t.constants.remove(addr);
            }
        });
        Ok(())
    }

    async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.constants.retain(|_, c| c.height != height);
        });
        Ok(())
    }

    async fn delete_cycle(&self, _cycle: i64) -> Result<(), IndexerError> {
        Ok(())
    }
}
