use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tzindex_core::ChainBlock;

use super::{Account, AccountId, Baker, Contract, ProposalId};

/// Block row written once per height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: i64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    pub cycle: i64,
    pub protocol: String,
    pub version: i32,
    pub round: i64,
    pub baker_id: Option<AccountId>,
    pub proposer_id: Option<AccountId>,
    pub n_ops: usize,
    pub n_ops_failed: usize,
    pub n_calls: usize,
    pub n_new_accounts: usize,
    pub n_new_contracts: usize,
    pub volume: i64,
    pub fee: i64,
    pub reward: i64,
    pub deposit: i64,
    pub burned: i64,
    pub gas_used: i64,
    pub storage_paid: i64,
}

impl Block {
    pub fn new(height: i64, hash: impl Into<String>, parent_hash: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            height,
            hash: hash.into(),
            parent_hash: parent_hash.into(),
            timestamp,
            cycle: 0,
            protocol: String::new(),
            version: 0,
            round: 0,
            baker_id: None,
            proposer_id: None,
            n_ops: 0,
            n_ops_failed: 0,
            n_calls: 0,
            n_new_accounts: 0,
            n_new_contracts: 0,
            volume: 0,
            fee: 0,
            reward: 0,
            deposit: 0,
            burned: 0,
            gas_used: 0,
            storage_paid: 0,
        }
    }
}

impl ChainBlock for Block {
    fn height(&self) -> i64 {
        self.height
    }
    fn hash(&self) -> &str {
        &self.hash
    }
    fn parent_hash(&self) -> &str {
        &self.parent_hash
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn cycle(&self) -> i64 {
        self.cycle
    }
}

/// Pre-images of everything a block changed outside the contract table.
///
/// `None` marks a record created by the block; rolling back removes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub height: i64,
    pub accounts: Vec<(AccountId, Option<Account>)>,
    pub bakers: Vec<(AccountId, Option<Baker>)>,
    /// Contracts the block found in the store, as loaded.
    #[serde(default)]
    pub contracts: Vec<(AccountId, Contract)>,
    pub contracts_created: Vec<AccountId>,
    pub constants_created: Vec<String>,
    pub proposals_created: Vec<ProposalId>,
}

impl BlockUndo {
    pub fn new(height: i64) -> Self {
        Self {
            height,
            ..Default::default()
        }
    }
}
