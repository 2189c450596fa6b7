//! Translation of balance updates into flows and their effect on balances.
//!
//! Receipts list debits and credits as adjacent pairs of opposite sign. A
//! pair becomes one flow: a transfer when both sides are ledger balances, a
//! burn when the credit leaves the ledger and a mint when the debit comes
//! from outside it. Updates without a partner are booked on their own.

use tzindex_codec::balance::category;
use tzindex_codec::{BalanceKind, BalanceUpdate, OpKind};

use super::context::BlockBuilder;
use crate::error::BuildError;
use crate::model::{AccountId, Flow, FlowKind, FlowType};

/// Where the flows of one batch of updates belong.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Origin {
    /// `None` derives the type from the update category.
    pub op_type: Option<FlowType>,
    pub op_n: Option<usize>,
    pub group: Option<(usize, usize)>,
}

impl Origin {
    pub fn block() -> Self {
        Self {
            op_type: None,
            op_n: None,
            group: None,
        }
    }

    pub fn op(kind: OpKind, op_n: usize, group: (usize, usize)) -> Self {
        Self {
            op_type: Some(FlowType::Op(kind)),
            op_n: Some(op_n),
            group: Some(group),
        }
    }
}

/// Totals of one translated batch.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Totals {
    pub fees: i64,
    pub burned: i64,
    pub rewards: i64,
    pub deposits: i64,
    /// Fees and burns charged to the payer passed to [`translate`].
    pub payer_fees: i64,
    pub payer_burned: i64,
}

impl Totals {
    pub fn add(&mut self, o: Totals) {
        self.fees += o.fees;
        self.burned += o.burned;
        self.rewards += o.rewards;
        self.deposits += o.deposits;
        self.payer_fees += o.payer_fees;
        self.payer_burned += o.payer_burned;
    }
}

/// Ledger position of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Spendable(AccountId),
    Frozen(AccountId, FlowKind),
    FeePool,
}

fn side(b: &BlockBuilder, u: &BalanceUpdate) -> Result<Option<Side>, BuildError> {
    Ok(match u.kind {
        BalanceKind::Contract => match u.address() {
            Some(a) => Some(Side::Spendable(b.id_of(a)?)),
            None => None,
        },
        BalanceKind::Freezer | BalanceKind::Staking => match u.address() {
            Some(a) => Some(Side::Frozen(b.id_of(a)?, frozen_kind(u))),
            None => None,
        },
        BalanceKind::Accumulator if u.is_block_fees() => Some(Side::FeePool),
        _ => None,
    })
}

fn frozen_kind(u: &BalanceUpdate) -> FlowKind {
    match u.category() {
        category::LEGACY_FEES => FlowKind::Fees,
        category::LEGACY_REWARDS => FlowKind::Rewards,
        _ => FlowKind::Deposits,
    }
}

fn category_type(u: &BalanceUpdate) -> Option<FlowType> {
    if u.is_migration() {
        return Some(FlowType::Migration);
    }
    Some(match u.category() {
        category::BAKING_REWARDS | category::LEGACY_REWARDS => FlowType::Baking,
        category::BAKING_BONUSES => FlowType::Bonus,
        category::ENDORSING_REWARDS | category::ATTESTING_REWARDS => FlowType::Endorsing,
        category::NONCE_REVELATION_REWARDS => FlowType::NonceRevelation,
        category::INVOICE => FlowType::Invoice,
        category::SUBSIDY => FlowType::Subsidy,
        category::BOOTSTRAP => FlowType::Bootstrap,
        category::PUNISHMENTS
        | category::LOST_ENDORSING_REWARDS
        | category::LOST_ATTESTING_REWARDS => FlowType::Penalty,
        _ => return None,
    })
}

fn is_reward(u: &BalanceUpdate) -> bool {
    u.category().contains("rewards") || u.category() == category::BAKING_BONUSES
}

/// Turn `updates` into flows, apply them and record them on the block.
///
/// `payer` is the account whose fees and burns may be offset against its
/// baker's delegated balance.
pub(crate) fn translate(
    b: &mut BlockBuilder,
    updates: &[BalanceUpdate],
    origin: Origin,
    payer: Option<AccountId>,
) -> Result<Totals, BuildError> {
    let mut totals = Totals::default();
    let mut i = 0;
    while i < updates.len() {
        let u = &updates[i];
        if u.change == 0 {
            i += 1;
            continue;
        }
        if let Some(v) = updates.get(i + 1).filter(|v| v.change == -u.change) {
            let (debit, credit) = if u.change < 0 { (u, v) } else { (v, u) };
            if let Some(f) = pair_flow(b, debit, credit, origin)? {
                emit(b, f, origin, payer, &mut totals)?;
            }
            i += 2;
            continue;
        }
        if let Some(f) = single_flow(b, u, origin)? {
            emit(b, f, origin, payer, &mut totals)?;
        }
        i += 1;
    }
    Ok(totals)
}

fn pair_flow(
    b: &BlockBuilder,
    debit: &BalanceUpdate,
    credit: &BalanceUpdate,
    origin: Origin,
) -> Result<Option<Flow>, BuildError> {
    let x = credit.change;
    let from = side(b, debit)?;
    let to = side(b, credit)?;
    let op_type = origin
        .op_type
        .or_else(|| category_type(credit))
        .or_else(|| category_type(debit));

    let flow = match (from, to) {
        // payouts from the fee pool are already booked by the fee flows
        (Some(Side::FeePool), _) => return Ok(None),
        (None, None) => return Ok(None),

        (Some(Side::Spendable(s)), Some(Side::FeePool)) => {
            let Some(r) = b.block.proposer_id.or(b.block.baker_id) else {
                return Err(BuildError::invariant(b.height(), "fee paid without block baker"));
            };
            let mut f = Flow::new(FlowKind::Balance, op_type.unwrap_or(FlowType::Baking));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f.is_fee = true;
            f
        }
        (Some(Side::Spendable(s)), Some(Side::Frozen(r, FlowKind::Fees))) => {
            let mut f = Flow::new(FlowKind::Fees, op_type.unwrap_or(FlowType::Baking));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f.is_fee = true;
            f.is_frozen = true;
            f
        }
        (Some(Side::Frozen(..)), Some(Side::FeePool)) | (None, Some(Side::FeePool)) => {
            return Err(BuildError::invariant(
                b.height(),
                format!("unexpected fee pool credit of {x}"),
            ))
        }

        // burns
        (Some(Side::Spendable(s)), None) => {
            let mut f = Flow::new(FlowKind::Balance, op_type.unwrap_or(FlowType::Penalty));
            f.sender_id = Some(s);
            f.amount_out = x;
            f.is_burned = true;
            f
        }
        (Some(Side::Frozen(s, kind)), None) => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Penalty));
            f.sender_id = Some(s);
            f.amount_out = x;
            f.is_burned = true;
            f.is_unfrozen = true;
            f
        }

        // mints
        (None, Some(Side::Spendable(r))) => {
            let kind = if is_reward(debit) || is_reward(credit) {
                FlowKind::Rewards
            } else {
                FlowKind::Balance
            };
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Migration));
            f.receiver_id = Some(r);
            f.amount_in = x;
            f
        }
        (None, Some(Side::Frozen(r, kind))) => {
            let kind = if is_reward(debit) { FlowKind::Rewards } else { kind };
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Baking));
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.is_frozen = true;
            f
        }

        // transfers
        (Some(Side::Spendable(s)), Some(Side::Spendable(r))) => {
            let mut f = Flow::new(FlowKind::Balance, op_type.unwrap_or(FlowType::Migration));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f
        }
        (Some(Side::Spendable(s)), Some(Side::Frozen(r, kind))) => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Deposit));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f.is_frozen = true;
            f
        }
        (Some(Side::Frozen(s, kind)), Some(Side::Spendable(r))) => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Unfreeze));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f.is_unfrozen = true;
            f
        }
        (Some(Side::Frozen(s, kind)), Some(Side::Frozen(r, _))) => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Deposit));
            f.sender_id = Some(s);
            f.receiver_id = Some(r);
            f.amount_in = x;
            f.amount_out = x;
            f.is_frozen = true;
            f.is_unfrozen = true;
            f
        }
    };
    Ok(Some(flow))
}

/// An update without a partner: a ledger debit burns, a ledger credit
/// mints.
fn single_flow(b: &BlockBuilder, u: &BalanceUpdate, origin: Origin) -> Result<Option<Flow>, BuildError> {
    let op_type = origin.op_type.or_else(|| category_type(u));
    let x = u.change.abs();
    let flow = match side(b, u)? {
        None | Some(Side::FeePool) => return Ok(None),
        Some(Side::Spendable(id)) if u.change < 0 => {
            let mut f = Flow::new(FlowKind::Balance, op_type.unwrap_or(FlowType::Penalty));
            f.sender_id = Some(id);
            f.amount_out = x;
            f.is_burned = true;
            f
        }
        Some(Side::Spendable(id)) => {
            let kind = if is_reward(u) { FlowKind::Rewards } else { FlowKind::Balance };
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Migration));
            f.receiver_id = Some(id);
            f.amount_in = x;
            f
        }
        Some(Side::Frozen(id, kind)) if u.change < 0 => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Penalty));
            f.sender_id = Some(id);
            f.amount_out = x;
            f.is_unfrozen = true;
            f.is_burned = true;
            f
        }
        Some(Side::Frozen(id, kind)) => {
            let mut f = Flow::new(kind, op_type.unwrap_or(FlowType::Baking));
            f.receiver_id = Some(id);
            f.amount_in = x;
            f.is_frozen = true;
            f
        }
    };
    Ok(Some(flow))
}

fn emit(
    b: &mut BlockBuilder,
    mut f: Flow,
    origin: Origin,
    payer: Option<AccountId>,
    totals: &mut Totals,
) -> Result<(), BuildError> {
    f.height = b.height();
    f.cycle = b.cycle();
    f.op_n = origin.op_n;
    f.group = origin.group;

    if f.is_fee {
        totals.fees += f.amount_out;
        if payer.is_some() && f.sender_id == payer {
            totals.payer_fees += f.amount_out;
        }
    }
    if f.is_burned {
        totals.burned += f.amount_out;
        if payer.is_some() && f.sender_id == payer {
            totals.payer_burned += f.amount_out;
        }
    }
    if f.kind == FlowKind::Rewards {
        totals.rewards += f.amount_in;
    }
    if f.kind == FlowKind::Deposits && f.is_frozen && !f.is_unfrozen {
        totals.deposits += f.amount_in;
    }

    // fees and burns of the payer are offset once per operation
    let effects = if f.is_fee || f.is_burned {
        Vec::new()
    } else {
        delegation_effects(b, &f)
    };
    apply(b, &f)?;
    b.flows.push(f);
    for d in effects {
        apply(b, &d)?;
        b.flows.push(d);
    }
    Ok(())
}

/// Delegated balance changes caused by a spendable balance change of a
/// delegator.
fn delegation_effects(b: &BlockBuilder, f: &Flow) -> Vec<Flow> {
    let mut out = None;
    let mut inn = None;
    if let Some(s) = f.sender_id.filter(|_| !f.is_unfrozen && f.amount_out > 0) {
        if let Some(baker) = b.account(s).and_then(|a| a.delegate()) {
            out = Some((baker, s));
        }
    }
    if let Some(r) = f.receiver_id.filter(|_| !f.is_frozen && f.amount_in > 0) {
        if let Some(baker) = b.account(r).and_then(|a| a.delegate()) {
            inn = Some((baker, r));
        }
    }
    // a transfer between two delegators of the same baker leaves it unchanged
    if let (Some((a, _)), Some((c, _))) = (out, inn) {
        if a == c && f.amount_in == f.amount_out {
            return Vec::new();
        }
    }
    let mut flows = Vec::with_capacity(2);
    if let Some((baker, s)) = out {
        flows.push(delegation_flow(f, baker, s, 0, f.amount_out));
    }
    if let Some((baker, r)) = inn {
        flows.push(delegation_flow(f, baker, r, f.amount_in, 0));
    }
    flows
}

pub(crate) fn delegation_flow(
    like: &Flow,
    baker: AccountId,
    delegator: AccountId,
    amount_in: i64,
    amount_out: i64,
) -> Flow {
    let mut d = Flow::new(FlowKind::Delegation, like.op_type);
    d.height = like.height;
    d.cycle = like.cycle;
    d.op_n = like.op_n;
    d.group = like.group;
    d.sender_id = Some(baker);
    d.receiver_id = Some(delegator);
    d.amount_in = amount_in;
    d.amount_out = amount_out;
    d
}

/// Record a change of `baker`'s delegated balance caused by `delegator`.
pub(crate) fn book_delegation(
    b: &mut BlockBuilder,
    origin: Origin,
    baker: AccountId,
    delegator: AccountId,
    amount_in: i64,
    amount_out: i64,
) -> Result<(), BuildError> {
    if amount_in == 0 && amount_out == 0 {
        return Ok(());
    }
    let mut like = Flow::new(FlowKind::Delegation, origin.op_type.unwrap_or(FlowType::Migration));
    like.height = b.height();
    like.cycle = b.cycle();
    like.op_n = origin.op_n;
    like.group = origin.group;
    let f = delegation_flow(&like, baker, delegator, amount_in, amount_out);
    apply(b, &f)?;
    b.flows.push(f);
    Ok(())
}

fn frozen_bucket(baker: &mut crate::model::Baker, kind: FlowKind) -> &mut i64 {
    match kind {
        FlowKind::Rewards => &mut baker.frozen_rewards,
        FlowKind::Fees => &mut baker.frozen_fees,
        _ => &mut baker.frozen_deposits,
    }
}

/// Apply one flow to account and baker balances.
pub(crate) fn apply(b: &mut BlockBuilder, f: &Flow) -> Result<(), BuildError> {
    if f.is_delegation() {
        if let Some(id) = f.sender_id {
            b.ensure_baker(id)?.delegated_balance += f.amount_in - f.amount_out;
        }
        return Ok(());
    }

    if let Some(s) = f.sender_id {
        if f.is_unfrozen {
            let baker = b.ensure_baker(s)?;
            *frozen_bucket(baker, f.kind) -= f.amount_out;
            if f.is_burned {
                baker.total_lost += f.amount_out;
            }
        } else {
            let a = b.account_mut(s)?;
            a.spendable_balance -= f.amount_out;
            if f.is_fee {
                a.total_fees_paid += f.amount_out;
            } else if f.is_burned {
                a.total_burned += f.amount_out;
            } else {
                a.total_sent += f.amount_out;
            }
        }
    }

    if let Some(r) = f.receiver_id {
        if f.is_frozen {
            let baker = b.ensure_baker(r)?;
            *frozen_bucket(baker, f.kind) += f.amount_in;
            if f.kind == FlowKind::Rewards {
                baker.total_rewards_earned += f.amount_in;
            }
            if f.is_fee {
                baker.total_fees_earned += f.amount_in;
            }
        } else {
            let a = b.account_mut(r)?;
            a.spendable_balance += f.amount_in;
            if !f.is_fee {
                a.total_received += f.amount_in;
            }
            if let Some(baker) = b.bakers.get_mut(&r) {
                if f.is_fee {
                    baker.total_fees_earned += f.amount_in;
                }
                if f.kind == FlowKind::Rewards {
                    baker.total_rewards_earned += f.amount_in;
                }
            }
        }
    }
    Ok(())
}
