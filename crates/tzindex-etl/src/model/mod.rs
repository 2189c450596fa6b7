//! Ledger rows produced by the builder.

mod account;
mod block;
mod contract;
mod flow;
mod gov;
mod op;

pub use account::{Account, AccountId, Baker};
pub use block::{Block, BlockUndo};
pub use contract::{Contract, ROLLUP_CALL_SLOTS};
pub use flow::{Flow, FlowKind, FlowType};
pub use gov::{Ballot, Constant, Proposal, ProposalId, Vote};
pub use op::Op;
