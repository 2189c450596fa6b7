//! Ledger effects of operations and block metadata.

use tzindex_codec::micheline::entrypoint_id;
use tzindex_codec::{
    Address, AddressSet, BalanceUpdate, Block as RpcBlock, InternalResult, OpKind, OpRef,
    Operation, OperationResult, Script,
};

use super::context::BlockBuilder;
use super::flows::{book_delegation, translate, Origin, Totals};
use super::Builder;
use crate::conservation::Ledger;
use crate::error::BuildError;
use crate::model::{AccountId, Ballot, Constant, Contract, Op, Proposal, ProposalId, Vote};

/// Delegate change requested by an operation, applied after its offset.
struct Switch {
    account: AccountId,
    delegate: Option<AccountId>,
}

/// Call slot of a rollup operation.
fn rollup_slot(kind: OpKind) -> Option<usize> {
    use OpKind as K;
    Some(match kind {
        K::TxRollupSubmitBatch | K::SmartRollupAddMessages => 0,
        K::TxRollupCommit | K::SmartRollupPublish => 1,
        K::TxRollupFinalizeCommitment | K::SmartRollupCement => 2,
        K::TxRollupReturnBond | K::SmartRollupRecoverBond => 3,
        K::TxRollupRemoveCommitment => 4,
        K::TxRollupRejection | K::SmartRollupRefute => 5,
        K::SmartRollupTimeout => 6,
        K::TxRollupDispatchTickets | K::SmartRollupExecuteOutboxMessage => 7,
        _ => return None,
    })
}

fn call_slot(c: &Contract, entrypoint: &str) -> Option<usize> {
    match &c.script {
        Some(script) => entrypoint_id(&script.entrypoints(), entrypoint),
        None if c.address.is_rollup() => None,
        None => (entrypoint == "default" || entrypoint.is_empty()).then_some(0),
    }
}

fn credits_to(updates: &[BalanceUpdate], id: AccountId, b: &BlockBuilder) -> i64 {
    updates
        .iter()
        .filter(|u| u.is_contract() && u.change > 0)
        .filter(|u| u.address().and_then(|a| b.account_id(a)) == Some(id))
        .map(|u| u.change)
        .sum()
}

/// Copy the result envelope into the row.
fn fill_result(row: &mut Op, res: &OperationResult) {
    row.status = res.status;
    row.is_success = res.is_success();
    row.gas_used = res.gas();
    row.n_bigmap_events = res.bigmap_events.len();
    row.n_ticket_updates = res.ticket_updates.len();
    if res.is_success() {
        row.storage_paid = res.paid_storage_size_diff;
    }
    if !res.errors.is_empty() {
        row.errors = serde_json::to_string(&res.errors).ok();
    }
}

/// Book a call or storage change on a contract and record the storage
/// it holds afterwards on the row.
fn touch_contract(
    b: &mut BlockBuilder,
    row: &mut Op,
    id: AccountId,
    entrypoint: Option<&str>,
    res: Option<&OperationResult>,
) {
    let Some(c) = b.contracts.get_mut(&id) else {
        return;
    };
    row.contract_id = Some(id);
    row.entrypoint_id = match entrypoint {
        Some(name) => call_slot(c, name),
        None => rollup_slot(row.kind).filter(|_| c.address.is_rollup()),
    };
    if row.is_success {
        match res.and_then(|r| r.storage.as_ref()) {
            Some(storage) => {
                row.storage = Some(storage.to_bytes());
                row.storage_hash = storage.hash64();
            }
            None => {
                row.storage = Some(c.storage.clone());
                row.storage_hash = c.storage_hash;
            }
        }
    }
    c.update(row);
}

impl Builder {
    // ─── Block metadata ───────────────────────────────────────────────────────

    pub(super) fn apply_block(&self, b: &mut BlockBuilder, rpc: &RpcBlock) -> Result<(), BuildError> {
        let height = b.height();
        if let Some(id) = b.block.baker_id {
            b.ensure_baker(id)?.blocks_baked += 1;
        }
        if let Some(id) = b.block.proposer_id {
            b.ensure_baker(id)?.blocks_proposed += 1;
        }

        translate(b, &rpc.metadata.balance_updates, Origin::block(), None)?;

        for r in &rpc.metadata.implicit_results {
            if r.kind == OpKind::Origination && r.result.is_success() {
                for addr in &r.result.originated_contracts {
                    let mut row = Op::new(OpKind::Origination, height, b.block.timestamp);
                    self.originate(b, &mut row, addr, None, None, r.script.as_ref())?;
                }
            }
            translate(b, &r.result.balance_updates, Origin::block(), None)?;
        }

        for addr in &rpc.metadata.deactivated {
            let id = b.id_of(addr)?;
            let baker = b.ensure_baker(id)?;
            baker.is_active = false;
            baker.deactivated_at = height;
        }
        Ok(())
    }

    // ─── Operations ───────────────────────────────────────────────────────────

    pub(super) fn apply_op(
        &self,
        b: &mut BlockBuilder,
        ledger: &mut Ledger,
        r: OpRef,
        hash: &str,
        op: &Operation,
    ) -> Result<(), BuildError> {
        let height = b.height();
        let kind = op.kind();
        let group = (r.pass, r.group);
        let mut row = b.new_op(kind, hash, r);
        let origin = Origin::op(kind, row.op_n, group);
        let src = op.source().map(|a| b.id_of(a)).transpose()?;
        let res = op.result();
        let ok = op.is_success();

        row.sender_id = src;
        row.baker_id = src.and_then(|id| b.account(id)).and_then(|a| a.baker_id);
        if let Some(m) = op.manager() {
            row.counter = m.counter;
            row.fee = m.fee;
            row.gas_limit = m.gas_limit;
            row.storage_limit = m.storage_limit;
        }
        if let Some(res) = res {
            fill_result(&mut row, res);
        }
        let mut embedded = AddressSet::new();
        op.collect_embedded(&mut embedded);
        row.involved = b.embedded_ids(&embedded);

        // fees are charged even when the operation fails
        ledger.report(group, op.fees());
        let first_flow = b.flows.len();
        let mut totals = translate(b, op.fees(), origin, src)?;
        let mut switches = Vec::new();

        // contracts must exist before value reaches them
        if let (Operation::Origination(o), Some(res)) = (op, res.filter(|_| ok)) {
            for addr in &res.originated_contracts {
                self.originate(b, &mut row, addr, src, o.delegate.as_ref(), o.script.as_ref())?;
            }
        }

        let mut result_totals = Totals::default();
        if let Some(res) = res.filter(|r| r.is_success()) {
            ledger.report(group, &res.balance_updates);
            result_totals = translate(b, &res.balance_updates, origin, src)?;
            totals.add(result_totals);
        }
        row.burned = result_totals.burned;

        match op {
            Operation::Activation(o) => {
                let id = b.id_of(&o.pkh)?;
                row.receiver_id = Some(id);
                row.volume = credits_to(op.fees(), id, b);
                b.account_mut(id)?.is_activated = true;
            }
            Operation::Endorsement(o) => {
                if let Some(id) = src {
                    b.ensure_baker(id)?.slots_endorsed += o.metadata.power();
                }
                row.reward = totals.rewards;
                row.deposit = totals.deposits;
            }
            Operation::DoubleBaking(_)
            | Operation::DoubleEndorsement(_)
            | Operation::SeedNonce(_)
            | Operation::VdfRevelation(_) => {
                // accuser earns, offender loses
                let flows = &b.flows[first_flow..];
                row.sender_id = flows
                    .iter()
                    .find(|f| f.amount_in > 0 && !f.is_delegation())
                    .and_then(|f| f.receiver_id)
                    .or(b.block.baker_id);
                row.receiver_id = flows
                    .iter()
                    .find(|f| f.is_burned || f.is_unfrozen)
                    .and_then(|f| f.sender_id);
                row.reward = totals.rewards;
                row.burned = totals.burned;
            }
            Operation::DrainDelegate(o) => {
                let id = b.id_of(&o.destination)?;
                row.receiver_id = Some(id);
                row.volume = credits_to(op.fees(), id, b);
            }
            Operation::Proposals(o) => {
                let source = b.id_of(&o.source)?;
                for hash in &o.proposals {
                    let proposal_id = self.proposal_id(b, hash, source, o.period);
                    b.ballots.push(Ballot {
                        height,
                        cycle: b.cycle(),
                        op_n: row.op_n,
                        period: o.period,
                        proposal_id,
                        source_id: source,
                        vote: Vote::Proposal,
                    });
                }
                b.ensure_baker(source)?.n_proposals += 1;
            }
            Operation::Ballot(o) => {
                let source = b.id_of(&o.source)?;
                let vote = Vote::parse(&o.ballot).ok_or_else(|| {
                    BuildError::invariant(height, format!("unknown ballot {:?}", o.ballot))
                })?;
                let proposal_id = self.proposal_id(b, &o.proposal, source, o.period);
                b.ballots.push(Ballot {
                    height,
                    cycle: b.cycle(),
                    op_n: row.op_n,
                    period: o.period,
                    proposal_id,
                    source_id: source,
                    vote,
                });
                b.ensure_baker(source)?.n_ballots += 1;
            }
            Operation::Reveal(o) => {
                if ok {
                    if let Some(id) = src {
                        let a = b.account_mut(id)?;
                        a.is_revealed = true;
                        a.pubkey = Some(o.public_key.clone());
                    }
                }
            }
            Operation::Transaction(tx) => {
                let dst = b.id_of(&tx.destination)?;
                row.receiver_id = Some(dst);
                if tx.parameters.is_some() {
                    row.entrypoint = Some(tx.entrypoint().to_string());
                }
                if ok {
                    row.volume = tx.amount;
                    if let Some(id) = src {
                        b.account_mut(id)?.n_tx += 1;
                    }
                }
                touch_contract(b, &mut row, dst, Some(tx.entrypoint()), res);
            }
            Operation::Origination(o) => {
                if ok {
                    row.volume = o.balance;
                    if let Some(id) = src {
                        b.account_mut(id)?.n_origination += 1;
                    }
                    if let Some(c) = row.contract_id.and_then(|id| b.contracts.get_mut(&id)) {
                        c.storage_paid = row.storage_paid;
                        c.storage_burn = row.burned;
                    }
                }
            }
            Operation::Delegation(o) => {
                let delegate = o.delegate.as_ref().map(|d| b.id_of(d)).transpose()?;
                row.receiver_id = delegate;
                if let (true, Some(account)) = (ok, src) {
                    b.account_mut(account)?.n_delegation += 1;
                    switches.push(Switch { account, delegate });
                }
            }
            Operation::RegisterConstant(o) => {
                if let (Some(addr), Some(creator)) =
                    (res.filter(|_| ok).and_then(|r| r.global_address.as_deref()), src)
                {
                    b.undo.constants_created.push(addr.to_string());
                    b.constants.push(Constant::new(addr, creator, height, o.value.clone()));
                    b.account_mut(creator)?.n_constants += 1;
                }
            }
            Operation::SetDepositsLimit(o) => {
                if let (true, Some(id)) = (ok, src) {
                    b.ensure_baker(id)?.deposits_limit = o.limit;
                }
            }
            Operation::IncreasePaidStorage(o) => {
                let dst = b.id_of(&o.destination)?;
                row.receiver_id = Some(dst);
                if ok {
                    row.storage_paid = o.amount;
                }
                touch_contract(b, &mut row, dst, None, res);
            }
            Operation::TransferTicket(o) => {
                row.receiver_id = Some(b.id_of(&o.destination)?);
                row.entrypoint = Some(o.entrypoint.clone());
            }
            Operation::UpdateConsensusKey(_) => {}
            Operation::Rollup(o) => {
                let target = o.rollup.as_ref().map(|a| b.id_of(a)).transpose()?;
                row.receiver_id = target;
                match res.filter(|_| ok).and_then(|r| r.rollup_address()) {
                    Some(addr) => {
                        let id = b.id_of(addr)?;
                        let c = Contract::originate(id, *addr, src, None, None, height);
                        b.account_mut(id)?.creator_id = src;
                        row.receiver_id = Some(id);
                        row.contract_id = Some(id);
                        b.add_contract(c);
                        b.block.n_new_contracts += 1;
                    }
                    None => {
                        if let Some(id) = target {
                            touch_contract(b, &mut row, id, None, res);
                        }
                    }
                }
            }
        }

        if let Some(id) = src {
            let a = b.account_mut(id)?;
            a.n_ops += 1;
            a.last_seen = height;
            if !row.is_success {
                a.n_ops_failed += 1;
            }
            if let Some(m) = op.manager() {
                a.counter = a.counter.max(m.counter);
            }
        }
        if let Some(id) = row.receiver_id.filter(|r| Some(*r) != src) {
            if let Some(a) = b.accounts.get_mut(&id) {
                a.last_seen = height;
            }
        }
        b.ops.push(row);

        for (i, ir) in op.internal_results().iter().enumerate() {
            let t = self.apply_internal(b, ledger, r, hash, i, ir, src, &mut switches)?;
            totals.add(t);
        }

        // the source's baker loses what the source paid in fees and burns
        if let Some(id) = src {
            if let Some(baker) = b.account(id).and_then(|a| a.delegate()) {
                if let Some(amount) = self.policy.offset(kind, totals.payer_fees, totals.payer_burned) {
                    book_delegation(b, origin, baker, id, 0, amount)?;
                }
            }
        }

        for s in switches {
            switch_delegate(b, s.account, s.delegate, origin)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_internal(
        &self,
        b: &mut BlockBuilder,
        ledger: &mut Ledger,
        r: OpRef,
        hash: &str,
        index: usize,
        ir: &InternalResult,
        payer: Option<AccountId>,
        switches: &mut Vec<Switch>,
    ) -> Result<Totals, BuildError> {
        let height = b.height();
        let group = (r.pass, r.group);
        let mut row = b.new_op(ir.kind, hash, r);
        row.internal = Some(index);
        row.creator_id = payer;
        let origin = Origin::op(ir.kind, row.op_n, group);
        let sender = b.id_of(&ir.source)?;
        row.sender_id = Some(sender);
        row.baker_id = b.account(sender).and_then(|a| a.baker_id);
        fill_result(&mut row, &ir.result);
        let ok = ir.is_success();

        if ok && ir.kind == OpKind::Origination {
            for addr in &ir.result.originated_contracts {
                self.originate(b, &mut row, addr, Some(sender), ir.delegate.as_ref(), ir.script.as_ref())?;
            }
        }

        let mut totals = Totals::default();
        if ok {
            ledger.report(group, &ir.result.balance_updates);
            totals = translate(b, &ir.result.balance_updates, origin, payer)?;
            row.burned = totals.burned;
        }

        match ir.kind {
            OpKind::Transaction => {
                if let Some(dst) = &ir.destination {
                    let dst = b.id_of(dst)?;
                    row.receiver_id = Some(dst);
                    if ir.parameters.is_some() {
                        row.entrypoint = Some(ir.entrypoint().to_string());
                    }
                    if ok {
                        row.volume = ir.amount;
                        b.account_mut(sender)?.n_tx += 1;
                    }
                    touch_contract(b, &mut row, dst, Some(ir.entrypoint()), Some(&ir.result));
                }
            }
            OpKind::Origination => {
                if ok {
                    row.volume = ir.balance;
                    b.account_mut(sender)?.n_origination += 1;
                    if let Some(c) = row.contract_id.and_then(|id| b.contracts.get_mut(&id)) {
                        c.storage_paid = row.storage_paid;
                        c.storage_burn = row.burned;
                    }
                }
            }
            OpKind::Delegation => {
                let delegate = ir.delegate.as_ref().map(|d| b.id_of(d)).transpose()?;
                row.receiver_id = delegate;
                if ok {
                    b.account_mut(sender)?.n_delegation += 1;
                    switches.push(Switch {
                        account: sender,
                        delegate,
                    });
                }
            }
            _ => {}
        }

        let a = b.account_mut(sender)?;
        a.n_ops += 1;
        a.last_seen = height;
        if !ok {
            a.n_ops_failed += 1;
        }
        b.ops.push(row);
        Ok(totals)
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    /// Create the contract account `address` with its expanded script.
    pub(super) fn originate(
        &self,
        b: &mut BlockBuilder,
        row: &mut Op,
        address: &Address,
        creator: Option<AccountId>,
        delegate: Option<&Address>,
        script: Option<&Script>,
    ) -> Result<AccountId, BuildError> {
        let height = b.height();
        let id = b.id_of(address)?;
        let baker = delegate.map(|d| b.id_of(d)).transpose()?;
        let script = script.map(|s| self.expand_script(b, s, height)).transpose()?;

        let account = b.account_mut(id)?;
        account.is_contract = true;
        account.creator_id = creator;
        if let Some(bk) = baker {
            account.baker_id = Some(bk);
            account.is_delegated = true;
            account.delegated_since = height;
            let baker = b.ensure_baker(bk)?;
            baker.active_delegations += 1;
            baker.total_delegations += 1;
        }

        let c = Contract::originate(id, *address, creator, baker, script, height);
        row.receiver_id = Some(id);
        row.contract_id = Some(id);
        row.storage = Some(c.storage.clone());
        row.storage_hash = c.storage_hash;
        b.add_contract(c);
        b.block.n_new_contracts += 1;
        Ok(id)
    }

    /// Replace global constant references with their values.
    /// Constants registered earlier in the same block are not cached yet.
    pub(super) fn expand_script(
        &self,
        b: &BlockBuilder,
        script: &Script,
        height: i64,
    ) -> Result<Script, BuildError> {
        let mut script = script.clone();
        if !script.constants().is_empty() {
            script
                .expand_constants(|h| b.staged_constant(h).or_else(|| self.constants.get(h)))
                .map_err(|source| BuildError::Decode { height, source })?;
        }
        Ok(script)
    }

    fn proposal_id(&self, b: &mut BlockBuilder, hash: &str, source: AccountId, period: i64) -> ProposalId {
        if let Some(p) = b.proposals.iter().find(|p| p.hash == hash) {
            return p.id;
        }
        if let Some(id) = self.proposals.get_id(hash) {
            return id;
        }
        let id = self.proposals.next_id() + b.proposals.len() as ProposalId;
        b.proposals.push(Proposal {
            id,
            hash: hash.to_string(),
            height: b.height(),
            period,
            source_id: source,
        });
        b.undo.proposals_created.push(id);
        id
    }
}

/// Move `account` to a new baker, taking its spendable balance along.
/// Delegating to itself registers the account as a baker.
fn switch_delegate(
    b: &mut BlockBuilder,
    account: AccountId,
    delegate: Option<AccountId>,
    origin: Origin,
) -> Result<(), BuildError> {
    let height = b.height();
    let (old, balance) = {
        let a = b
            .account(account)
            .ok_or_else(|| BuildError::invariant(height, format!("account {account} not loaded")))?;
        (a.delegate(), a.spendable_balance)
    };

    if delegate == Some(account) {
        if let Some(o) = old {
            book_delegation(b, origin, o, account, 0, balance)?;
            b.ensure_baker(o)?.active_delegations -= 1;
        }
        b.ensure_baker(account)?.is_active = true;
        let a = b.account_mut(account)?;
        a.is_delegated = false;
        a.delegated_since = height;
        return Ok(());
    }
    if old == delegate {
        return Ok(());
    }

    if let Some(o) = old {
        book_delegation(b, origin, o, account, 0, balance)?;
        b.ensure_baker(o)?.active_delegations -= 1;
    }
    if let Some(n) = delegate {
        let baker = b.ensure_baker(n)?;
        baker.active_delegations += 1;
        baker.total_delegations += 1;
        book_delegation(b, origin, n, account, balance, 0)?;
    }
    let a = b.account_mut(account)?;
    a.baker_id = delegate;
    a.is_delegated = delegate.is_some();
    a.delegated_since = if delegate.is_some() { height } else { 0 };
    tracing::trace!(height, account, ?delegate, "Delegate changed");
    Ok(())
}
