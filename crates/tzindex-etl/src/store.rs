//! Read access the builder needs from committed ledger tables.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tzindex_codec::Address;
use tzindex_core::IndexerError;

use crate::model::{Account, AccountId, Baker, Block, BlockUndo, Constant, Contract, Op, Proposal};

/// Committed ledger state. Implemented by the table engine in
/// `tzindex-storage`; the builder never writes through it.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Highest account id ever allocated, including ids of accounts whose
    /// creating block was rolled back.
    async fn account_id_high_water(&self) -> Result<AccountId, IndexerError>;

    async fn account(&self, id: AccountId) -> Result<Option<Account>, IndexerError>;

    async fn account_by_address(&self, address: &Address) -> Result<Option<Account>, IndexerError>;

    async fn baker(&self, id: AccountId) -> Result<Option<Baker>, IndexerError>;

    async fn contract(&self, id: AccountId) -> Result<Option<Contract>, IndexerError>;

    async fn block(&self, height: i64) -> Result<Option<Block>, IndexerError>;

    async fn block_undo(&self, height: i64) -> Result<Option<BlockUndo>, IndexerError>;

    /// Operation rows of one block in `op_n` order.
    async fn ops_at(&self, height: i64) -> Result<Vec<Op>, IndexerError>;

    /// Latest successful operation on `contract` below `height`.
    async fn last_contract_op(
        &self,
        contract: AccountId,
        height: i64,
    ) -> Result<Option<Op>, IndexerError>;

    fn proposals(&self) -> BoxStream<'_, Result<Proposal, IndexerError>>;

    fn constants(&self) -> BoxStream<'_, Result<Constant, IndexerError>>;
}
