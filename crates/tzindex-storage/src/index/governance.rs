//! Proposals, ballots and per-cycle vote tallies.

use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;
use crate::tables::{CycleRow, VoteTally};

pub struct GovernanceIndex {
    store: Arc<MemoryStore>,
}

impl GovernanceIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for GovernanceIndex {
    fn name(&self) -> &str {
        "Governance index"
    }

    fn key(&self) -> &str {
        "governance"
    }

    fn tables(&self) -> Vec<String> {
        vec!["proposal".into(), "ballot".into(), "vote_cycle".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn connect_block(&self, block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        if ctx.proposals.is_empty() && ctx.ballots.is_empty() {
            return Ok(());
        }
        let height = block.height;
        let cycle = block.cycle;
        let proposals = ctx.proposals.clone();
        let ballots = ctx.ballots.clone();
        let tally = VoteTally::from_ballots(&ballots);
        self.store.write(move |t| {
            for p in proposals {
                t.proposals.insert(p.id, p);
            }
            t.ballots.insert(height, ballots);
            t.vote_cycles.insert(height, CycleRow { cycle, data: tally });
        });
        Ok(())
    }

    async fn disconnect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let created = ctx.undo.proposals_created.clone();
        self.store.write(move |t| {
            for id in &created {
                t.proposals.remove(id);
            }
        });
        Ok(())
    }

    async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.ballots.remove(&height);
            t.vote_cycles.remove(&height);
            t.proposals.retain(|_, p| p.height != height);
        });
        Ok(())
    }

    async fn delete_cycle(&self, cycle: i64) -> Result<(), IndexerError> {
        self.store.write(move |t| {
            t.vote_cycles.retain(|_, row| row.cycle != cycle);
        });
        Ok(())
    }
}
