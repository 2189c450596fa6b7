use std::fmt;

use serde::{Deserialize, Serialize};
use tzindex_codec::OpKind;

use super::AccountId;

/// Which balance a flow moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Balance,
    Rewards,
    Deposits,
    Fees,
    /// Change of a baker's delegated balance, no funds move.
    Delegation,
}

/// What caused a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Op(OpKind),
    Baking,
    Bonus,
    Endorsing,
    NonceRevelation,
    Deposit,
    Unfreeze,
    Invoice,
    Subsidy,
    Bootstrap,
    Penalty,
    Migration,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op(k) => write!(f, "{k}"),
            Self::Baking => f.write_str("baking"),
            Self::Bonus => f.write_str("bonus"),
            Self::Endorsing => f.write_str("endorsing"),
            Self::NonceRevelation => f.write_str("nonce_revelation"),
            Self::Deposit => f.write_str("deposit"),
            Self::Unfreeze => f.write_str("unfreeze"),
            Self::Invoice => f.write_str("invoice"),
            Self::Subsidy => f.write_str("subsidy"),
            Self::Bootstrap => f.write_str("bootstrap"),
            Self::Penalty => f.write_str("penalty"),
            Self::Migration => f.write_str("migration"),
        }
    }
}

/// One balance movement.
///
/// `amount_out` leaves the sender, `amount_in` reaches the receiver. A
/// transfer between two accounts carries the same value on both sides; a
/// burn has no receiver and a mint no sender. `is_unfrozen` marks a sender
/// paying from its frozen balance, `is_frozen` a receiver credited to it.
///
/// Delegation flows reuse the same fields: the sender is the baker whose
/// delegated balance grows by `amount_in` and shrinks by `amount_out`, the
/// receiver the delegator that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub height: i64,
    pub cycle: i64,
    /// Position of the operation in the block, `None` for block-level flows.
    pub op_n: Option<usize>,
    /// Validation pass and group index of the operation.
    pub group: Option<(usize, usize)>,
    pub sender_id: Option<AccountId>,
    pub receiver_id: Option<AccountId>,
    pub kind: FlowKind,
    pub op_type: FlowType,
    pub amount_in: i64,
    pub amount_out: i64,
    pub is_fee: bool,
    pub is_burned: bool,
    pub is_frozen: bool,
    pub is_unfrozen: bool,
}

impl Flow {
    pub fn new(kind: FlowKind, op_type: FlowType) -> Self {
        Self {
            height: 0,
            cycle: 0,
            op_n: None,
            group: None,
            sender_id: None,
            receiver_id: None,
            kind,
            op_type,
            amount_in: 0,
            amount_out: 0,
            is_fee: false,
            is_burned: false,
            is_frozen: false,
            is_unfrozen: false,
        }
    }

    pub fn is_delegation(&self) -> bool {
        self.kind == FlowKind::Delegation
    }

    /// Net change of ledger balances, zero for delegation flows.
    pub fn net(&self) -> i64 {
        if self.is_delegation() {
            0
        } else {
            self.amount_in - self.amount_out
        }
    }
}
