//! Balance flows and per-cycle flow summaries.

use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;
use crate::tables::{CycleRow, FlowSummary};

pub struct FlowIndex {
    store: Arc<MemoryStore>,
}

impl FlowIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for FlowIndex {
    fn name(&self) -> &str {
        "Flow index"
    }

    fn key(&self) -> &str {
        "flow"
    }

    fn tables(&self) -> Vec<String> {
        vec!["flow".into(), "flow_cycle".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn connect_block(&self, block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let height = block.height;
        let cycle = block.cycle;
        let flows = ctx.flows.clone();
        let summary = FlowSummary::from_flows(&flows);
        self.store.write(move |t| {
            t.flows.insert(height, flows);
            t.flow_cycles.insert(height, CycleRow { cycle, data: summary });
        });
        Ok(())
    }

    async fn disconnect_block(&self, _block: &Block, _ctx: &BlockBuilder) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.flows.remove(&height);
            t.flow_cycles.remove(&height);
        });
        Ok(())
    }

    async fn delete_cycle(&self, cycle: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.flow_cycles.retain(|_, row| row.cycle != cycle);
        });
        Ok(())
    }
}
