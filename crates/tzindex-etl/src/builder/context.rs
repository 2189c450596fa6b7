//! Per-block working set handed to index modules.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tzindex_codec::{Address, OpKind, OpRef, Prim};
use tzindex_core::TaskScheduler;

use crate::error::BuildError;
use crate::model::{
    Account, AccountId, Baker, Ballot, Block, BlockUndo, Constant, Contract, Flow, Op, Proposal,
};
use crate::params::Params;

/// Everything one block changed, as after-images.
///
/// On connect the maps hold the state after the block; on rollback they
/// hold the restored state and `removed_*` lists the records the block had
/// created. The context is owned by one block and dropped after commit.
#[derive(Debug)]
pub struct BlockBuilder {
    pub block: Block,
    pub params: Arc<Params>,
    pub accounts: IndexMap<AccountId, Account>,
    pub bakers: IndexMap<AccountId, Baker>,
    pub contracts: IndexMap<AccountId, Contract>,
    pub ops: Vec<Op>,
    pub flows: Vec<Flow>,
    pub constants: Vec<Constant>,
    pub proposals: Vec<Proposal>,
    pub ballots: Vec<Ballot>,
    pub undo: BlockUndo,
    pub removed_accounts: Vec<AccountId>,
    pub removed_bakers: Vec<AccountId>,
    pub removed_contracts: Vec<AccountId>,
    /// Highest account id allocated so far.
    pub next_account_id: AccountId,
    rolled_back: bool,
    addresses: HashMap<Address, AccountId>,
    /// Known accounts found only inside Micheline values.
    embedded: HashMap<Address, AccountId>,
    scheduler: Option<TaskScheduler>,
}

impl BlockBuilder {
    pub(crate) fn new(block: Block, params: Arc<Params>, next_account_id: AccountId) -> Self {
        let height = block.height;
        Self {
            block,
            params,
            accounts: IndexMap::new(),
            bakers: IndexMap::new(),
            contracts: IndexMap::new(),
            ops: Vec::new(),
            flows: Vec::new(),
            constants: Vec::new(),
            proposals: Vec::new(),
            ballots: Vec::new(),
            undo: BlockUndo::new(height),
            removed_accounts: Vec::new(),
            removed_bakers: Vec::new(),
            removed_contracts: Vec::new(),
            next_account_id,
            rolled_back: false,
            addresses: HashMap::new(),
            embedded: HashMap::new(),
            scheduler: None,
        }
    }

    pub(crate) fn with_scheduler(mut self, scheduler: Option<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub(crate) fn mark_rollback(&mut self) {
        self.rolled_back = true;
    }

    pub fn height(&self) -> i64 {
        self.block.height
    }

    pub fn cycle(&self) -> i64 {
        self.block.cycle
    }

    /// `true` when this context describes a disconnected block.
    pub fn is_rollback(&self) -> bool {
        self.rolled_back
    }

    /// Handle for deferred work, absent when the crawler runs without a
    /// task executor.
    pub fn scheduler(&self) -> Option<&TaskScheduler> {
        self.scheduler.as_ref()
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn account_id(&self, address: &Address) -> Option<AccountId> {
        self.addresses
            .get(address)
            .or_else(|| self.embedded.get(address))
            .copied()
    }

    pub fn account_by_address(&self, address: &Address) -> Option<&Account> {
        self.addresses.get(address).and_then(|id| self.accounts.get(id))
    }

    pub fn baker(&self, id: AccountId) -> Option<&Baker> {
        self.bakers.get(&id)
    }

    pub fn contract(&self, id: AccountId) -> Option<&Contract> {
        self.contracts.get(&id)
    }

    /// Accounts allocated by this block.
    pub fn new_accounts(&self) -> impl Iterator<Item = &Account> {
        self.undo
            .accounts
            .iter()
            .filter(|(_, pre)| pre.is_none())
            .filter_map(|(id, _)| self.accounts.get(id))
    }

    /// Value of a constant registered by this block.
    pub(crate) fn staged_constant(&self, address: &str) -> Option<Prim> {
        self.constants
            .iter()
            .find(|c| c.address == address)
            .map(|c| c.value.clone())
    }

    pub fn ops_of_kind(&self, kind: OpKind) -> impl Iterator<Item = &Op> {
        self.ops.iter().filter(move |o| o.kind == kind)
    }

    // ─── Tracking ─────────────────────────────────────────────────────────────

    pub(crate) fn is_tracked(&self, address: &Address) -> bool {
        self.addresses.contains_key(address)
    }

    /// Track a loaded account, keeping its pre-image for rollback.
    pub(crate) fn track_account(&mut self, account: Account) {
        self.addresses.insert(account.address, account.id);
        self.undo.accounts.push((account.id, Some(account.clone())));
        self.accounts.insert(account.id, account);
    }

    pub(crate) fn track_new_account(&mut self, account: Account) {
        self.addresses.insert(account.address, account.id);
        self.undo.accounts.push((account.id, None));
        self.block.n_new_accounts += 1;
        self.accounts.insert(account.id, account);
    }

    pub(crate) fn track_embedded(&mut self, address: Address, id: AccountId) {
        self.embedded.insert(address, id);
    }

    pub(crate) fn track_baker(&mut self, baker: Baker) {
        self.undo.bakers.push((baker.account_id, Some(baker.clone())));
        self.bakers.insert(baker.account_id, baker);
    }

    /// Track a loaded contract, keeping its pre-image for rollback.
    pub(crate) fn track_contract(&mut self, contract: Contract) {
        let id = contract.account_id;
        if self.contracts.contains_key(&id) {
            return;
        }
        self.undo.contracts.push((id, contract.clone()));
        self.contracts.insert(id, contract);
    }

    /// Add a contract created by this block.
    pub(crate) fn add_contract(&mut self, contract: Contract) {
        let id = contract.account_id;
        if !self.undo.contracts_created.contains(&id) {
            self.undo.contracts_created.push(id);
        }
        self.contracts.insert(id, contract);
    }

    // ─── Lookups used while building ──────────────────────────────────────────

    pub(crate) fn id_of(&self, address: &Address) -> Result<AccountId, BuildError> {
        self.addresses
            .get(address)
            .copied()
            .ok_or_else(|| BuildError::MissingAccount {
                height: self.block.height,
                address: address.to_string(),
            })
    }

    pub(crate) fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, BuildError> {
        let height = self.block.height;
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| BuildError::invariant(height, format!("account {id} not loaded")))
    }

    /// Baker record of `id`, registering the account as a baker when it
    /// has none yet.
    pub(crate) fn ensure_baker(&mut self, id: AccountId) -> Result<&mut Baker, BuildError> {
        if !self.bakers.contains_key(&id) {
            let height = self.block.height;
            let account = self.account_mut(id)?;
            account.is_baker = true;
            account.baker_id = Some(id);
            let baker = Baker::new(id, account.address, height);
            tracing::debug!(height, baker = %baker.address, "Registering baker");
            self.undo.bakers.push((id, None));
            self.bakers.insert(id, baker);
        }
        let height = self.block.height;
        self.bakers
            .get_mut(&id)
            .ok_or_else(|| BuildError::invariant(height, format!("baker {id} not loaded")))
    }

    /// Row template for an operation of this block.
    pub(crate) fn new_op(&self, kind: OpKind, hash: &str, r: OpRef) -> Op {
        let mut op = Op::new(kind, self.block.height, self.block.timestamp);
        op.cycle = self.block.cycle;
        op.hash = hash.to_string();
        op.op_n = self.ops.len();
        op.pass = r.pass;
        op.group = r.group;
        op.content = r.content;
        op
    }

    pub(crate) fn embedded_ids<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = addresses
            .into_iter()
            .filter_map(|a| self.account_id(a))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Fill block totals once every operation has been applied.
    pub(crate) fn finish(&mut self) {
        let b = &mut self.block;
        for f in self.flows.iter().filter(|f| !f.is_delegation()) {
            if f.is_fee {
                b.fee += f.amount_in;
            }
            if f.is_burned {
                b.burned += f.amount_out;
            }
            match f.kind {
                crate::model::FlowKind::Rewards if f.sender_id.is_none() => b.reward += f.amount_in,
                crate::model::FlowKind::Deposits if f.is_frozen && !f.is_unfrozen => {
                    b.deposit += f.amount_in
                }
                _ => {}
            }
        }
        for op in &self.ops {
            b.n_ops += 1;
            if !op.is_success {
                b.n_ops_failed += 1;
            }
            if op.is_call() {
                b.n_calls += 1;
            }
            if op.is_success {
                b.volume += op.volume;
                b.storage_paid += op.storage_paid;
            }
            b.gas_used += op.gas_used;
        }
        for account in self.accounts.values_mut() {
            account.is_funded = account.spendable_balance > 0;
        }
    }
}
