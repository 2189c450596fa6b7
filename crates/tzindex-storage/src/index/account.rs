//! Accounts and bakers.
//!
//! The builder context carries after-images on connect and restored
//! pre-images on disconnect, so both directions store the same way.

use std::sync::Arc;

use async_trait::async_trait;
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError};
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;

pub struct AccountIndex {
    store: Arc<MemoryStore>,
}

impl AccountIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn apply(&self, ctx: &BlockBuilder) {
        let accounts: Vec<_> = ctx.accounts.values().cloned().collect();
        let bakers: Vec<_> = ctx.bakers.values().cloned().collect();
        let removed_accounts = ctx.removed_accounts.clone();
        let removed_bakers = ctx.removed_bakers.clone();
        let next_id = ctx.next_account_id;
        self.store.write(move |t| {
            for a in accounts {
                t.put_account(a);
            }
            for b in bakers {
                t.bakers.insert(b.account_id, b);
            }
            for id in removed_accounts {
                t.remove_account(id);
            }
            for id in removed_bakers {
                t.bakers.remove(&id);
            }
            t.high_water = t.high_water.max(next_id);
        });
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for AccountIndex {
    fn name(&self) -> &str {
        "Account index"
    }

    fn key(&self) -> &str {
        "account"
    }

    fn tables(&self) -> Vec<String> {
        vec!["account".into(), "baker".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        let n = self.store.read(|t| t.accounts.len());
        tracing::debug!(accounts = n, "Account index opened");
        Ok(())
    }

    async fn connect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        self.apply(ctx);
        Ok(())
    }

    async fn disconnect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        self.apply(ctx);
        Ok(())
    }

    async fn delete_block(&self, _height: i64) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn delete_cycle(&self, _cycle: i64) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn finalize_sync(&self) -> Result<(), IndexerError> {
        self.store.write(|t| {
            let n = t.rebuild_addresses();
            tracing::info!(addresses = n, "Rebuilt address index");
        });
        Ok(())
    }
}
