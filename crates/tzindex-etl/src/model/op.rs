use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tzindex_codec::{OpKind, OpStatus};

use super::AccountId;

/// One operation row. Internal operations get their own row, placed after
/// the external operation that emitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub height: i64,
    pub cycle: i64,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    /// Position in the block, counting internal operations.
    pub op_n: usize,
    /// Validation pass, group and content index of the external operation.
    pub pass: usize,
    pub group: usize,
    pub content: usize,
    /// Index of the internal result, `None` for the external operation.
    pub internal: Option<usize>,
    pub kind: OpKind,
    pub status: OpStatus,
    pub is_success: bool,
    pub sender_id: Option<AccountId>,
    pub receiver_id: Option<AccountId>,
    /// Source of the external operation for internal rows.
    pub creator_id: Option<AccountId>,
    pub baker_id: Option<AccountId>,
    /// Contract whose state this operation touched.
    pub contract_id: Option<AccountId>,
    pub counter: i64,
    pub fee: i64,
    pub gas_limit: i64,
    pub gas_used: i64,
    pub storage_limit: i64,
    pub storage_paid: i64,
    pub volume: i64,
    pub reward: i64,
    pub deposit: i64,
    pub burned: i64,
    pub entrypoint: Option<String>,
    pub entrypoint_id: Option<usize>,
    /// Binary contract storage after a successful contract operation.
    pub storage: Option<Vec<u8>>,
    pub storage_hash: u64,
    pub n_bigmap_events: usize,
    pub n_ticket_updates: usize,
    pub errors: Option<String>,
    /// Known accounts whose addresses appear inside Micheline values.
    pub involved: Vec<AccountId>,
}

impl Op {
    pub fn new(kind: OpKind, height: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            height,
            cycle: 0,
            timestamp,
            hash: String::new(),
            op_n: 0,
            pass: 0,
            group: 0,
            content: 0,
            internal: None,
            kind,
            status: OpStatus::Applied,
            is_success: true,
            sender_id: None,
            receiver_id: None,
            creator_id: None,
            baker_id: None,
            contract_id: None,
            counter: 0,
            fee: 0,
            gas_limit: 0,
            gas_used: 0,
            storage_limit: 0,
            storage_paid: 0,
            volume: 0,
            reward: 0,
            deposit: 0,
            burned: 0,
            entrypoint: None,
            entrypoint_id: None,
            storage: None,
            storage_hash: 0,
            n_bigmap_events: 0,
            n_ticket_updates: 0,
            errors: None,
            involved: Vec::new(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.internal.is_some()
    }

    /// A call counted in the contract's call statistics.
    pub fn is_call(&self) -> bool {
        self.entrypoint_id.is_some()
    }
}
