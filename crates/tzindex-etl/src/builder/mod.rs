//! Block builder.
//!
//! Turns one decoded block into ledger rows: it resolves every referenced
//! address to an account, translates receipts into flows, applies them to
//! balances and collects operation, contract and governance rows. The
//! resulting [`BlockBuilder`] is handed to the index modules and dropped
//! after commit.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut builder = Builder::new(store).with_validation(true);
//! builder.params_mut().register(params);
//! builder.init().await?;
//!
//! let ctx = builder.build(&block).await?;     // connect
//! registry.connect_block(&ctx.block, &ctx).await?;
//! builder.commit(&ctx);
//!
//! let ctx = builder.rollback(height).await?;  // disconnect
//! registry.disconnect_block(&ctx.block, &parent, &ctx).await?;
//! builder.commit(&ctx);
//! ```
//!
//! Cache changes stay on the context until [`Builder::commit`].

mod context;
mod flows;
mod ops;

pub use context::BlockBuilder;

use std::sync::Arc;

use tzindex_codec::{Address, AddressSet, Block as RpcBlock};
use tzindex_core::TaskScheduler;

use crate::cache::{ConstantCache, ProposalCache};
use crate::conservation::Ledger;
use crate::error::BuildError;
use crate::model::{Account, AccountId, Block, Contract, Op};
use crate::params::{Params, ParamsRegistry};
use crate::policy::OffsetPolicy;
use crate::store::LedgerStore;

pub struct Builder {
    store: Arc<dyn LedgerStore>,
    params: ParamsRegistry,
    policy: OffsetPolicy,
    proposals: Arc<ProposalCache>,
    constants: Arc<ConstantCache>,
    scheduler: Option<TaskScheduler>,
    validate: bool,
    /// Highest account id handed out so far.
    next_id: AccountId,
}

impl Builder {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            params: ParamsRegistry::new(),
            policy: OffsetPolicy::default(),
            proposals: Arc::new(ProposalCache::new()),
            constants: Arc::new(ConstantCache::new()),
            scheduler: None,
            validate: true,
            next_id: 0,
        }
    }

    pub fn with_policy(mut self, policy: OffsetPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scheduler handed to index modules through every block context.
    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Check flow conservation for every operation group.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_caches(mut self, proposals: Arc<ProposalCache>, constants: Arc<ConstantCache>) -> Self {
        self.proposals = proposals;
        self.constants = constants;
        self
    }

    pub fn params(&self) -> &ParamsRegistry {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamsRegistry {
        &mut self.params
    }

    pub fn register_params(&mut self, params: Params) -> Arc<Params> {
        self.params.register(params)
    }

    pub fn proposals(&self) -> &Arc<ProposalCache> {
        &self.proposals
    }

    pub fn constants(&self) -> &Arc<ConstantCache> {
        &self.constants
    }

    pub fn next_account_id(&self) -> AccountId {
        self.next_id
    }

    /// Load the id high water and fill the caches from committed rows.
    pub async fn init(&mut self) -> Result<(), BuildError> {
        self.next_id = self.next_id.max(self.store.account_id_high_water().await?);
        let proposals = self.proposals.build(self.store.proposals()).await?;
        let constants = self.constants.build(self.store.constants()).await?;
        tracing::info!(
            next_account_id = self.next_id,
            proposals,
            constants,
            "Builder initialized"
        );
        Ok(())
    }

    // ─── Connect ──────────────────────────────────────────────────────────────

    /// Build the ledger changes of `rpc`.
    pub async fn build(&mut self, rpc: &RpcBlock) -> Result<BlockBuilder, BuildError> {
        let height = rpc.height();
        let params = self.params.for_height(height)?;

        let mut block = Block::new(height, rpc.hash.as_str(), rpc.predecessor(), rpc.timestamp());
        block.cycle = params.height_to_cycle(height);
        block.protocol = rpc.protocol.clone();
        block.version = params.version;
        block.round = rpc.header.payload_round.or(rpc.header.priority).unwrap_or(0);
        if let Some(info) = rpc.metadata.level_info() {
            if info.cycle != block.cycle {
                tracing::warn!(
                    height,
                    node_cycle = info.cycle,
                    cycle = block.cycle,
                    "Cycle differs from node level info"
                );
            }
        }

        let mut b = BlockBuilder::new(block, params, self.next_id)
            .with_scheduler(self.scheduler.clone());
        self.resolve(&mut b, rpc).await?;
        b.block.baker_id = rpc.baker().map(|a| b.id_of(a)).transpose()?;
        b.block.proposer_id = rpc.proposer().map(|a| b.id_of(a)).transpose()?;

        self.apply_block(&mut b, rpc)?;
        let mut ledger = Ledger::new();
        for (r, group, op) in rpc.ops() {
            self.apply_op(&mut b, &mut ledger, r, &group.hash, op)?;
        }
        if self.validate {
            ledger.check(height, &b.flows)?;
        }
        b.finish();
        self.next_id = b.next_account_id;

        tracing::debug!(
            height,
            hash = %b.block.hash,
            ops = b.ops.len(),
            flows = b.flows.len(),
            accounts = b.accounts.len(),
            new_accounts = b.block.n_new_accounts,
            "Block built"
        );
        Ok(b)
    }

    /// Load or allocate every account the block touches.
    async fn resolve(&self, b: &mut BlockBuilder, rpc: &RpcBlock) -> Result<(), BuildError> {
        let height = b.height();
        let mut set = AddressSet::new();
        set.extend(rpc.baker().copied());
        set.extend(rpc.proposer().copied());
        set.extend(rpc.metadata.balance_updates.iter().filter_map(|u| u.address().copied()));
        for r in &rpc.metadata.implicit_results {
            set.extend(r.result.originated_contracts.iter().copied());
            set.extend(r.result.balance_updates.iter().filter_map(|u| u.address().copied()));
        }
        set.extend(rpc.metadata.deactivated.iter().copied());
        let mut embedded = AddressSet::new();
        for (_, _, op) in rpc.ops() {
            op.addresses(&mut set);
            op.collect_embedded(&mut embedded);
        }

        for addr in &set {
            self.load_account(b, addr).await?;
        }

        // delegation flows need the baker of every delegator
        let missing: Vec<AccountId> = b
            .accounts
            .values()
            .filter_map(|a| a.baker_id)
            .filter(|id| !b.accounts.contains_key(id))
            .collect();
        for id in missing {
            if b.accounts.contains_key(&id) {
                continue;
            }
            let account = self.store.account(id).await?.ok_or_else(|| {
                BuildError::invariant(height, format!("baker account {id} missing"))
            })?;
            b.track_account(account);
        }

        let bakers: Vec<AccountId> = b.accounts.values().filter(|a| a.is_baker).map(|a| a.id).collect();
        for id in bakers {
            if let Some(baker) = self.store.baker(id).await? {
                b.track_baker(baker);
            }
        }

        let contracts: Vec<(AccountId, Address)> = b
            .accounts
            .values()
            .filter(|a| a.is_contract)
            .map(|a| (a.id, a.address))
            .collect();
        for (id, address) in contracts {
            match self.store.contract(id).await? {
                Some(c) => b.track_contract(c),
                None => b.add_contract(Contract::stub(id, address, height)),
            }
        }

        let embedded: Vec<Address> = embedded.into_iter().filter(|a| !b.is_tracked(a)).collect();
        for addr in embedded {
            if let Some(account) = self.store.account_by_address(&addr).await? {
                b.track_embedded(addr, account.id);
            }
        }
        Ok(())
    }

    async fn load_account(&self, b: &mut BlockBuilder, addr: &Address) -> Result<(), BuildError> {
        if b.is_tracked(addr) {
            return Ok(());
        }
        match self.store.account_by_address(addr).await? {
            Some(account) => b.track_account(account),
            None => {
                b.next_account_id += 1;
                let account = Account::new(b.next_account_id, *addr, b.height());
                b.track_new_account(account);
            }
        }
        Ok(())
    }

    /// Apply the cache changes of a context whose rows were committed.
    pub fn commit(&self, ctx: &BlockBuilder) {
        if ctx.is_rollback() {
            for hash in &ctx.undo.constants_created {
                self.constants.remove(hash);
            }
            for id in &ctx.undo.proposals_created {
                self.proposals.remove(*id);
            }
        } else {
            for c in &ctx.constants {
                self.constants.insert(c.address.clone(), c.value.clone());
            }
            for p in &ctx.proposals {
                self.proposals.insert(p.id, p.hash.clone());
            }
        }
    }

    // ─── Disconnect ───────────────────────────────────────────────────────────

    /// Restore the state before `height` from the block's undo record.
    ///
    /// Account ids allocated by the block stay consumed.
    pub async fn rollback(&mut self, height: i64) -> Result<BlockBuilder, BuildError> {
        let block = self
            .store
            .block(height)
            .await?
            .ok_or_else(|| BuildError::not_found("block", height))?;
        let undo = self
            .store
            .block_undo(height)
            .await?
            .ok_or_else(|| BuildError::not_found("block undo", height))?;
        let ops = self.store.ops_at(height).await?;
        let params = self.params.for_height(height)?;

        let mut b = BlockBuilder::new(block, params, self.next_id)
            .with_scheduler(self.scheduler.clone());
        b.mark_rollback();

        for (id, pre) in &undo.accounts {
            match pre {
                Some(a) => {
                    b.accounts.insert(*id, a.clone());
                }
                None => b.removed_accounts.push(*id),
            }
        }
        for (id, pre) in &undo.bakers {
            match pre {
                Some(baker) => {
                    b.bakers.insert(*id, baker.clone());
                }
                None => b.removed_bakers.push(*id),
            }
        }

        for (id, pre) in &undo.contracts {
            b.contracts.insert(*id, pre.clone());
        }
        // records written without contract pre-images replay the ops backwards
        let mut touched: Vec<AccountId> = ops.iter().filter_map(|o| o.contract_id).collect();
        touched.sort_unstable();
        touched.dedup();
        for id in touched {
            if undo.contracts_created.contains(&id) || b.contracts.contains_key(&id) {
                continue;
            }
            let mut c = self.store.contract(id).await?.ok_or_else(|| {
                BuildError::invariant(height, format!("contract {id} missing"))
            })?;
            let drop: Vec<Op> = ops.iter().filter(|o| o.contract_id == Some(id)).cloned().collect();
            let last = self.store.last_contract_op(id, height).await?;
            c.rollback(&drop, last.as_ref());
            b.contracts.insert(id, c);
        }
        b.removed_contracts = undo.contracts_created.clone();

        tracing::debug!(
            height,
            accounts = b.accounts.len(),
            removed_accounts = b.removed_accounts.len(),
            contracts = b.contracts.len(),
            removed_contracts = b.removed_contracts.len(),
            "Block rolled back"
        );
        b.ops = ops;
        b.undo = undo;
        Ok(b)
    }
}
