use serde::{Deserialize, Serialize};
use tzindex_codec::Address;

/// Account ids are allocated once and never reused.
pub type AccountId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub address: Address,
    /// Current baker, `Some(id)` of itself for bakers.
    pub baker_id: Option<AccountId>,
    pub creator_id: Option<AccountId>,
    pub pubkey: Option<String>,
    pub counter: i64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub delegated_since: i64,
    pub spendable_balance: i64,
    pub total_received: i64,
    pub total_sent: i64,
    pub total_burned: i64,
    pub total_fees_paid: i64,
    pub n_ops: i64,
    pub n_ops_failed: i64,
    pub n_tx: i64,
    pub n_delegation: i64,
    pub n_origination: i64,
    pub n_constants: i64,
    pub is_funded: bool,
    pub is_activated: bool,
    pub is_delegated: bool,
    pub is_revealed: bool,
    pub is_baker: bool,
    pub is_contract: bool,
}

impl Account {
    pub fn new(id: AccountId, address: Address, height: i64) -> Self {
        Self {
            id,
            address,
            baker_id: None,
            creator_id: None,
            pubkey: None,
            counter: 0,
            first_seen: height,
            last_seen: height,
            delegated_since: 0,
            spendable_balance: 0,
            total_received: 0,
            total_sent: 0,
            total_burned: 0,
            total_fees_paid: 0,
            n_ops: 0,
            n_ops_failed: 0,
            n_tx: 0,
            n_delegation: 0,
            n_origination: 0,
            n_constants: 0,
            is_funded: false,
            is_activated: false,
            is_delegated: false,
            is_revealed: false,
            is_baker: false,
            is_contract: address.is_contract() || address.is_rollup(),
        }
    }

    /// Baker whose delegated balance includes this account. Bakers count
    /// their own balance separately.
    pub fn delegate(&self) -> Option<AccountId> {
        match self.baker_id {
            Some(b) if b != self.id => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baker {
    pub account_id: AccountId,
    pub address: Address,
    pub is_active: bool,
    pub baker_since: i64,
    pub deactivated_at: i64,
    pub delegated_balance: i64,
    pub active_delegations: i64,
    pub total_delegations: i64,
    pub frozen_deposits: i64,
    pub frozen_rewards: i64,
    pub frozen_fees: i64,
    pub deposits_limit: Option<i64>,
    pub blocks_baked: i64,
    pub blocks_proposed: i64,
    pub slots_endorsed: i64,
    pub total_rewards_earned: i64,
    pub total_fees_earned: i64,
    pub total_lost: i64,
    pub n_proposals: i64,
    pub n_ballots: i64,
}

impl Baker {
    pub fn new(account_id: AccountId, address: Address, height: i64) -> Self {
        Self {
            account_id,
            address,
            is_active: true,
            baker_since: height,
            deactivated_at: 0,
            delegated_balance: 0,
            active_delegations: 0,
            total_delegations: 0,
            frozen_deposits: 0,
            frozen_rewards: 0,
            frozen_fees: 0,
            deposits_limit: None,
            blocks_baked: 0,
            blocks_proposed: 0,
            slots_endorsed: 0,
            total_rewards_earned: 0,
            total_fees_earned: 0,
            total_lost: 0,
            n_proposals: 0,
            n_ballots: 0,
        }
    }

    pub fn frozen_balance(&self) -> i64 {
        self.frozen_deposits + self.frozen_rewards + self.frozen_fees
    }
}
