//! Row layout of the in-memory table engine.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tzindex_codec::Address;
use tzindex_core::ChainTip;
use tzindex_etl::model::{
    Account, AccountId, Baker, Ballot, Block, BlockUndo, Constant, Contract, Flow, FlowKind, Op,
    Proposal, ProposalId, Vote,
};

/// Per-account flow totals of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub received: i64,
    pub sent: i64,
    pub fees_paid: i64,
    pub fees_earned: i64,
    pub burned: i64,
    pub rewards: i64,
    pub deposits: i64,
    pub delegated_in: i64,
    pub delegated_out: i64,
    pub n_flows: i64,
}

impl FlowSummary {
    pub fn merge(&mut self, other: &FlowSummary) {
        self.received += other.received;
        self.sent += other.sent;
        self.fees_paid += other.fees_paid;
        self.fees_earned += other.fees_earned;
        self.burned += other.burned;
        self.rewards += other.rewards;
        self.deposits += other.deposits;
        self.delegated_in += other.delegated_in;
        self.delegated_out += other.delegated_out;
        self.n_flows += other.n_flows;
    }

    /// Totals of `flows` keyed by account.
    pub fn from_flows(flows: &[Flow]) -> HashMap<AccountId, FlowSummary> {
        let mut out: HashMap<AccountId, FlowSummary> = HashMap::new();
        for f in flows {
            if f.is_delegation() {
                if let Some(baker) = f.sender_id {
                    let s = out.entry(baker).or_default();
                    s.delegated_in += f.amount_in;
                    s.delegated_out += f.amount_out;
                    s.n_flows += 1;
                }
                continue;
            }
            if let Some(id) = f.sender_id {
                let s = out.entry(id).or_default();
                s.sent += f.amount_out;
                s.n_flows += 1;
                if f.is_fee {
                    s.fees_paid += f.amount_out;
                }
                if f.is_burned {
                    s.burned += f.amount_out;
                }
            }
            if let Some(id) = f.receiver_id {
                let s = out.entry(id).or_default();
                s.received += f.amount_in;
                s.n_flows += 1;
                if f.is_fee {
                    s.fees_earned += f.amount_in;
                }
                match f.kind {
                    FlowKind::Rewards => s.rewards += f.amount_in,
                    FlowKind::Deposits if f.is_frozen => s.deposits += f.amount_in,
                    _ => {}
                }
            }
        }
        out
    }
}

/// Vote counts of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub yay: i64,
    pub nay: i64,
    pub pass: i64,
    pub proposals: i64,
}

impl VoteTally {
    pub fn from_ballots(ballots: &[Ballot]) -> Self {
        let mut t = Self::default();
        for b in ballots {
            match b.vote {
                Vote::Yay => t.yay += 1,
                Vote::Nay => t.nay += 1,
                Vote::Pass => t.pass += 1,
                Vote::Proposal => t.proposals += 1,
            }
        }
        t
    }

    pub fn merge(&mut self, other: &VoteTally) {
        self.yay += other.yay;
        self.nay += other.nay;
        self.pass += other.pass;
        self.proposals += other.proposals;
    }
}

/// Aggregate rows of one block, tagged with the block's cycle so a whole
/// cycle can be summed or purged.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRow<T> {
    pub cycle: i64,
    pub data: T,
}

/// Every table of the engine. Rows are keyed by account id or height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub accounts: HashMap<AccountId, Account>,
    /// Derived address lookup over `accounts`.
    pub addresses: HashMap<Address, AccountId>,
    pub bakers: HashMap<AccountId, Baker>,
    pub contracts: HashMap<AccountId, Contract>,
    pub blocks: BTreeMap<i64, Block>,
    pub undo: BTreeMap<i64, BlockUndo>,
    pub ops: BTreeMap<i64, Vec<Op>>,
    pub flows: BTreeMap<i64, Vec<Flow>>,
    pub flow_cycles: BTreeMap<i64, CycleRow<HashMap<AccountId, FlowSummary>>>,
    pub constants: BTreeMap<String, Constant>,
    pub proposals: BTreeMap<ProposalId, Proposal>,
    pub ballots: BTreeMap<i64, Vec<Ballot>>,
    pub vote_cycles: BTreeMap<i64, CycleRow<VoteTally>>,
    pub tips: HashMap<String, ChainTip>,
    /// Highest account id ever stored. Never decreases.
    pub high_water: AccountId,
}

impl Tables {
    pub fn put_account(&mut self, account: Account) {
        self.high_water = self.high_water.max(account.id);
        if let Some(old) = self.accounts.get(&account.id) {
            if old.address != account.address {
                self.addresses.remove(&old.address);
            }
        }
        self.addresses.insert(account.address, account.id);
        self.accounts.insert(account.id, account);
    }

    pub fn remove_account(&mut self, id: AccountId) {
        if let Some(old) = self.accounts.remove(&id) {
            self.addresses.remove(&old.address);
        }
    }

    /// Recreate the address lookup from the account table.
    pub fn rebuild_addresses(&mut self) -> usize {
        self.addresses = self
            .accounts
            .values()
            .map(|a| (a.address, a.id))
            .collect();
        self.addresses.len()
    }

    /// Flow totals of `cycle` summed over its blocks.
    pub fn flow_summary(&self, cycle: i64) -> HashMap<AccountId, FlowSummary> {
        let mut out: HashMap<AccountId, FlowSummary> = HashMap::new();
        for row in self.flow_cycles.values().filter(|r| r.cycle == cycle) {
            for (id, s) in &row.data {
                out.entry(*id).or_default().merge(s);
            }
        }
        out
    }

    pub fn vote_tally(&self, cycle: i64) -> VoteTally {
        let mut out = VoteTally::default();
        for row in self.vote_cycles.values().filter(|r| r.cycle == cycle) {
            out.merge(&row.data);
        }
        out
    }

    pub fn ops_at(&self, height: i64) -> &[Op] {
        self.ops.get(&height).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn flows_at(&self, height: i64) -> &[Flow] {
        self.flows.get(&height).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Latest successful operation on `contract` strictly below `height`.
    pub fn last_contract_op(&self, contract: AccountId, height: i64) -> Option<&Op> {
        self.ops
            .range(..height)
            .rev()
            .flat_map(|(_, ops)| ops.iter().rev())
            .find(|o| o.contract_id == Some(contract) && o.is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tzindex_codec::{AddressType, OpKind};
    use tzindex_etl::model::FlowType;

    fn flow(sender: Option<AccountId>, receiver: Option<AccountId>, amount: i64) -> Flow {
        let mut f = Flow::new(FlowKind::Balance, FlowType::Op(OpKind::Transaction));
        f.sender_id = sender;
        f.receiver_id = receiver;
        f.amount_in = if receiver.is_some() { amount } else { 0 };
        f.amount_out = if sender.is_some() { amount } else { 0 };
        f
    }

    #[test]
    fn flow_summary_splits_sides() {
        let mut fee = flow(Some(1), Some(2), 100);
        fee.is_fee = true;
        let mut burn = flow(Some(1), None, 50);
        burn.is_burned = true;
        let mut offset = Flow::new(FlowKind::Delegation, FlowType::Op(OpKind::Transaction));
        offset.sender_id = Some(3);
        offset.receiver_id = Some(1);
        offset.amount_out = 150;

        let s = FlowSummary::from_flows(&[fee, burn, flow(Some(1), Some(4), 200), offset]);
        assert_eq!((s[&1].sent, s[&1].fees_paid, s[&1].burned), (350, 100, 50));
        assert_eq!((s[&2].received, s[&2].fees_earned), (100, 100));
        assert_eq!(s[&4].received, 200);
        assert_eq!((s[&3].delegated_out, s[&3].sent), (150, 0));
        assert!(!s.contains_key(&0));
    }

    #[test]
    fn address_index_follows_accounts() {
        let mut t = Tables::default();
        let addr = Address::new(AddressType::Ed25519, [1; 20]);
        t.put_account(Account::new(7, addr, 1));
        assert_eq!(t.addresses.get(&addr), Some(&7));
        assert_eq!(t.high_water, 7);

        t.remove_account(7);
        assert!(t.addresses.is_empty());
        assert_eq!(t.high_water, 7);

        t.accounts.insert(8, Account::new(8, addr, 2));
        assert_eq!(t.rebuild_addresses(), 1);
        assert_eq!(t.addresses.get(&addr), Some(&8));
    }

    #[test]
    fn last_contract_op_skips_failures_and_later_blocks() {
        let ts = chrono::DateTime::from_timestamp(0, 0).unwrap();
        let mut t = Tables::default();
        let mut ok = Op::new(OpKind::Transaction, 10, ts);
        ok.contract_id = Some(5);
        ok.is_success = true;
        let mut failed = Op::new(OpKind::Transaction, 11, ts);
        failed.contract_id = Some(5);
        failed.is_success = false;
        let mut later = Op::new(OpKind::Transaction, 12, ts);
        later.contract_id = Some(5);
        later.is_success = true;
        t.ops.insert(10, vec![ok]);
        t.ops.insert(11, vec![failed]);
        t.ops.insert(12, vec![later]);

        assert_eq!(t.last_contract_op(5, 12).map(|o| o.height), Some(10));
        assert_eq!(t.last_contract_op(5, 10), None);
    }
}
