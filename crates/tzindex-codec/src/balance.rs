//! Balance updates attached to operation receipts and block metadata.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Top-level balance update kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceKind {
    Contract,
    Freezer,
    Accumulator,
    Minted,
    Burned,
    Commitment,
    Staking,
    #[serde(other)]
    Other,
}

/// Category strings used by the node for accumulator, minted and burned
/// updates.
pub mod category {
    pub const BLOCK_FEES: &str = "block fees";
    pub const STORAGE_FEES: &str = "storage fees";
    pub const BAKING_REWARDS: &str = "baking rewards";
    pub const BAKING_BONUSES: &str = "baking bonuses";
    pub const ENDORSING_REWARDS: &str = "endorsing rewards";
    pub const ATTESTING_REWARDS: &str = "attesting rewards";
    pub const NONCE_REVELATION_REWARDS: &str = "nonce revelation rewards";
    pub const DOUBLE_SIGNING_EVIDENCE_REWARDS: &str = "double signing evidence rewards";
    pub const PUNISHMENTS: &str = "punishments";
    pub const DEPOSITS: &str = "deposits";
    pub const INVOICE: &str = "invoice";
    pub const BOOTSTRAP: &str = "bootstrap";
    pub const SUBSIDY: &str = "subsidy";
    pub const LOST_ENDORSING_REWARDS: &str = "lost endorsing rewards";
    pub const LOST_ATTESTING_REWARDS: &str = "lost attesting rewards";
    pub const LEGACY_FEES: &str = "fees";
    pub const LEGACY_REWARDS: &str = "rewards";
    pub const LEGACY_DEPOSITS: &str = "deposits";
}

/// Owner of a staked deposit (Oxford and later).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Address>,
    #[serde(default, alias = "baker", skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub kind: BalanceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staker: Option<Staker>,
    /// Legacy freezer updates carry the cycle they belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<i64>,
    #[serde(with = "crate::util::int_str")]
    pub change: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl BalanceUpdate {
    /// The account whose balance moves, if any. Staked deposits are
    /// attributed to the baker holding them.
    pub fn address(&self) -> Option<&Address> {
        self.contract
            .as_ref()
            .or(self.delegate.as_ref())
            .or_else(|| {
                let s = self.staker.as_ref()?;
                s.delegate.as_ref().or(s.contract.as_ref())
            })
    }

    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }

    pub fn is_contract(&self) -> bool {
        self.kind == BalanceKind::Contract
    }

    pub fn is_debit(&self) -> bool {
        self.change < 0
    }

    pub fn is_credit(&self) -> bool {
        self.change > 0
    }

    pub fn is_burn_sink(&self) -> bool {
        self.kind == BalanceKind::Burned || self.category() == category::STORAGE_FEES
    }

    pub fn is_block_fees(&self) -> bool {
        self.kind == BalanceKind::Accumulator && self.category() == category::BLOCK_FEES
    }

    /// Pre-v012 freezer credits that collect operation fees.
    pub fn is_legacy_fee_freezer(&self) -> bool {
        self.kind == BalanceKind::Freezer && self.category() == category::LEGACY_FEES
    }

    /// Updates that move value into or out of the fee pool of the block.
    pub fn is_fee_sink(&self) -> bool {
        self.is_block_fees() || self.is_legacy_fee_freezer()
    }

    pub fn is_migration(&self) -> bool {
        self.origin.as_deref() == Some("migration")
    }
}
