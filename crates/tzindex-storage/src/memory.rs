//! In-memory table engine.
//!
//! Holds every ledger table in RAM behind one lock. Index modules write
//! through [`MemoryStore::write`]; while a block transaction is open the
//! writes are staged and become visible together on commit, so readers
//! (the builder and API queries) never observe half a block.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tzindex_codec::Address;
use tzindex_core::{BlockTx, ChainTip, IndexerError, TipStore};
use tzindex_etl::model::{
    Account, AccountId, Baker, Block, BlockUndo, Constant, Contract, Op, Proposal,
};
use tzindex_etl::LedgerStore;

use crate::tables::Tables;

type Write = Box<dyn FnOnce(&mut Tables) + Send>;

struct Pending {
    height: i64,
    writes: Vec<Write>,
}

/// Row counts for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub accounts: usize,
    pub bakers: usize,
    pub contracts: usize,
    pub blocks: usize,
    pub ops: usize,
    pub flows: usize,
    pub constants: usize,
    pub proposals: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "accounts={} bakers={} contracts={} blocks={} ops={} flows={}",
            self.accounts, self.bakers, self.contracts, self.blocks, self.ops, self.flows
        )
    }
}

/// Ledger tables in RAM. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    pending: Mutex<Option<Pending>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` now, or at commit when a block transaction is open.
    pub fn write(&self, f: impl FnOnce(&mut Tables) + Send + 'static) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(p) = pending.as_mut() {
            p.writes.push(Box::new(f));
            return;
        }
        drop(pending);
        f(&mut self.tables.write().unwrap());
    }

    /// Run `f` against committed state.
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read().unwrap())
    }

    /// Copy of every committed table.
    pub fn snapshot(&self) -> Tables {
        self.tables.read().unwrap().clone()
    }

    /// Height of the open block transaction, if any.
    pub fn pending_height(&self) -> Option<i64> {
        self.pending.lock().unwrap().as_ref().map(|p| p.height)
    }

    pub fn stats(&self) -> StoreStats {
        self.read(|t| StoreStats {
            accounts: t.accounts.len(),
            bakers: t.bakers.len(),
            contracts: t.contracts.len(),
            blocks: t.blocks.len(),
            ops: t.ops.values().map(Vec::len).sum(),
            flows: t.flows.values().map(Vec::len).sum(),
            constants: t.constants.len(),
            proposals: t.proposals.len(),
        })
    }

    pub fn block_hash(&self, height: i64) -> Option<String> {
        self.read(|t| t.blocks.get(&height).map(|b| b.hash.clone()))
    }
}

// ─── Block transactions ───────────────────────────────────────────────────────

#[async_trait]
impl BlockTx for MemoryStore {
    async fn begin(&self, height: i64) -> Result<(), IndexerError> {
        let mut pending = self.pending.lock().unwrap();
        if let Some(open) = pending.as_ref() {
            return Err(IndexerError::Storage(format!(
                "transaction for block {} still open at {height}",
                open.height
            )));
        }
        *pending = Some(Pending {
            height,
            writes: Vec::new(),
        });
        Ok(())
    }

    async fn commit(&self) -> Result<(), IndexerError> {
        let pending = self
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| IndexerError::Storage("commit without open transaction".into()))?;
        let n = pending.writes.len();
        let mut tables = self.tables.write().unwrap();
        for w in pending.writes {
            w(&mut *tables);
        }
        tracing::trace!(height = pending.height, writes = n, "Block transaction committed");
        Ok(())
    }

    async fn abort(&self) -> Result<(), IndexerError> {
        if let Some(p) = self.pending.lock().unwrap().take() {
            tracing::debug!(height = p.height, writes = p.writes.len(), "Block transaction aborted");
        }
        Ok(())
    }
}

// ─── Chain tips ───────────────────────────────────────────────────────────────

#[async_trait]
impl TipStore for MemoryStore {
    async fn load(&self, table: &str) -> Result<Option<ChainTip>, IndexerError> {
        Ok(self.read(|t| t.tips.get(table).cloned()))
    }

    async fn load_all(&self) -> Result<HashMap<String, ChainTip>, IndexerError> {
        Ok(self.read(|t| t.tips.clone()))
    }

    async fn save(&self, table: &str, tip: &ChainTip) -> Result<(), IndexerError> {
        let mut tables = self.tables.write().unwrap();
        tables.tips.insert(table.to_string(), tip.clone());
        Ok(())
    }

    async fn delete(&self, table: &str) -> Result<(), IndexerError> {
        self.tables.write().unwrap().tips.remove(table);
        Ok(())
    }
}

// ─── Ledger reads ─────────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn account_id_high_water(&self) -> Result<AccountId, IndexerError> {
        Ok(self.read(|t| t.high_water))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, IndexerError> {
        Ok(self.read(|t| t.accounts.get(&id).cloned()))
    }

    async fn account_by_address(&self, address: &Address) -> Result<Option<Account>, IndexerError> {
        Ok(self.read(|t| {
            t.addresses
                .get(address)
                .and_then(|id| t.accounts.get(id))
                .cloned()
        }))
    }

    async fn baker(&self, id: AccountId) -> Result<Option<Baker>, IndexerError> {
        Ok(self.read(|t| t.bakers.get(&id).cloned()))
    }

    async fn contract(&self, id: AccountId) -> Result<Option<Contract>, IndexerError> {
        Ok(self.read(|t| t.contracts.get(&id).cloned()))
    }

    async fn block(&self, height: i64) -> Result<Option<Block>, IndexerError> {
        Ok(self.read(|t| t.blocks.get(&height).cloned()))
    }

    async fn block_undo(&self, height: i64) -> Result<Option<BlockUndo>, IndexerError> {
        Ok(self.read(|t| t.undo.get(&height).cloned()))
    }

    async fn ops_at(&self, height: i64) -> Result<Vec<Op>, IndexerError> {
        Ok(self.read(|t| t.ops_at(height).to_vec()))
    }

    async fn last_contract_op(
        &self,
        contract: AccountId,
        height: i64,
    ) -> Result<Option<Op>, IndexerError> {
        Ok(self.read(|t| t.last_contract_op(contract, height).cloned()))
    }

    fn proposals(&self) -> BoxStream<'_, Result<Proposal, IndexerError>> {
        let rows: Vec<Proposal> = self.read(|t| t.proposals.values().cloned().collect());
        stream::iter(rows.into_iter().map(Ok)).boxed()
    }

    fn constants(&self) -> BoxStream<'_, Result<Constant, IndexerError>> {
        let rows: Vec<Constant> = self.read(|t| t.constants.values().cloned().collect());
        stream::iter(rows.into_iter().map(Ok)).boxed()
    }
}
