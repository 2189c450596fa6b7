//! Index modules over the in-memory table engine.
//!
//! Every module writes absolute after-images keyed by account id or height,
//! so connecting the same block twice leaves the same rows behind.

mod account;
mod block;
mod constant;
mod contract;
mod flow;
mod governance;
mod op;

pub use account::AccountIndex;
pub use block::BlockIndex;
pub use constant::ConstantIndex;
pub use contract::ContractIndex;
pub use flow::FlowIndex;
pub use governance::GovernanceIndex;
pub use op::OpIndex;

use std::sync::Arc;

use tzindex_core::BlockIndexer;
use tzindex_etl::model::Block;
use tzindex_etl::BlockBuilder;

use crate::memory::MemoryStore;

pub type LedgerIndex = dyn BlockIndexer<Block, BlockBuilder>;

/// The standard module set in registration order.
pub fn standard_indexes(store: &Arc<MemoryStore>) -> Vec<Arc<LedgerIndex>> {
    vec![
        Arc::new(BlockIndex::new(store.clone())),
        Arc::new(AccountIndex::new(store.clone())),
        Arc::new(ContractIndex::new(store.clone())),
        Arc::new(OpIndex::new(store.clone())),
        Arc::new(FlowIndex::new(store.clone())),
        Arc::new(ConstantIndex::new(store.clone())),
        Arc::new(GovernanceIndex::new(store.clone())),
    ]
}
