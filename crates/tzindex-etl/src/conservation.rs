//! Flow conservation.
//!
//! For every operation group the net of all non-delegation flows must equal
//! the net change the receipts report for ledger balances: accounts, frozen
//! baker balances and the block fee pool. Value leaving the ledger towards
//! no account must be flagged burned.

use std::collections::BTreeMap;

use tzindex_codec::{BalanceKind, BalanceUpdate};

use crate::error::BuildError;
use crate::model::Flow;

/// Returns `true` for updates that move a balance the ledger tracks.
pub fn is_ledger_side(u: &BalanceUpdate) -> bool {
    match u.kind {
        BalanceKind::Contract => true,
        BalanceKind::Freezer | BalanceKind::Staking => u.address().is_some(),
        BalanceKind::Accumulator => u.is_block_fees(),
        _ => false,
    }
}

/// Net ledger change reported by `updates`.
pub fn receipt_net<'a>(updates: impl IntoIterator<Item = &'a BalanceUpdate>) -> i64 {
    updates
        .into_iter()
        .filter(|u| is_ledger_side(u))
        .map(|u| u.change)
        .sum()
}

pub fn flow_net<'a>(flows: impl IntoIterator<Item = &'a Flow>) -> i64 {
    flows.into_iter().map(Flow::net).sum()
}

/// Per-group totals collected while building a block.
#[derive(Debug, Default)]
pub struct Ledger {
    reported: BTreeMap<(usize, usize), i64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the receipts of one operation content.
    pub fn report<'a>(
        &mut self,
        group: (usize, usize),
        updates: impl IntoIterator<Item = &'a BalanceUpdate>,
    ) {
        *self.reported.entry(group).or_default() += receipt_net(updates);
    }

    /// Compare every reported group with the flows built for it.
    pub fn check(&self, height: i64, flows: &[Flow]) -> Result<(), BuildError> {
        let mut built: BTreeMap<(usize, usize), i64> = BTreeMap::new();
        for f in flows {
            if let Some(g) = f.group {
                *built.entry(g).or_default() += f.net();
            }
            check_burned(height, f)?;
        }
        for (group, reported) in &self.reported {
            let net = built.get(group).copied().unwrap_or(0);
            if net != *reported {
                return Err(BuildError::invariant(
                    height,
                    format!(
                        "flow conservation in group {}/{}: flows net {net}, receipts net {reported}",
                        group.0, group.1
                    ),
                ));
            }
        }
        if let Some(g) = built.keys().find(|g| !self.reported.contains_key(g)) {
            return Err(BuildError::invariant(
                height,
                format!("flows for unreported group {}/{}", g.0, g.1),
            ));
        }
        Ok(())
    }
}

/// Value sent to no account must be burned.
fn check_burned(height: i64, f: &Flow) -> Result<(), BuildError> {
    if f.is_delegation() || f.receiver_id.is_some() || f.amount_out == 0 || f.is_burned {
        return Ok(());
    }
    Err(BuildError::invariant(
        height,
        format!(
            "unburned debit of {} without receiver ({})",
            f.amount_out, f.op_type
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowKind, FlowType};
    use serde_json::json;
    use tzindex_codec::OpKind;

    const SRC: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";

    fn updates() -> Vec<BalanceUpdate> {
        serde_json::from_value(json!([
            { "kind": "contract", "contract": SRC, "change": "-100", "origin": "block" },
            { "kind": "accumulator", "category": "block fees", "change": "100", "origin": "block" },
            { "kind": "contract", "contract": SRC, "change": "-50", "origin": "block" },
            { "kind": "burned", "category": "storage fees", "change": "50", "origin": "block" }
        ]))
        .unwrap()
    }

    fn flow(kind: FlowKind, inn: i64, out: i64, receiver: Option<u64>) -> Flow {
        let mut f = Flow::new(kind, FlowType::Op(OpKind::Transaction));
        f.group = Some((3, 0));
        f.sender_id = Some(1);
        f.receiver_id = receiver;
        f.amount_in = inn;
        f.amount_out = out;
        f
    }

    #[test]
    fn fee_and_burn_balance_out() {
        let u = updates();
        assert_eq!(receipt_net(&u), -50);

        let mut ledger = Ledger::new();
        ledger.report((3, 0), &u);
        let mut fee = flow(FlowKind::Balance, 100, 100, Some(2));
        fee.is_fee = true;
        let mut burn = flow(FlowKind::Balance, 0, 50, None);
        burn.is_burned = true;
        let offset = flow(FlowKind::Delegation, 0, 150, Some(1));
        ledger.check(10, &[fee, burn, offset]).unwrap();
    }

    #[test]
    fn mismatch_is_invariant_error() {
        let mut ledger = Ledger::new();
        ledger.report((3, 0), &updates());
        let fee = flow(FlowKind::Balance, 100, 100, Some(2));
        let err = ledger.check(10, &[fee]).unwrap_err();
        assert!(matches!(err, BuildError::Invariant { height: 10, .. }));
    }

    #[test]
    fn nil_debit_must_be_burned() {
        let mut ledger = Ledger::new();
        ledger.report((3, 0), &updates()[2..]);
        let burn = flow(FlowKind::Balance, 0, 50, None);
        let err = ledger.check(10, &[burn]).unwrap_err();
        assert!(err.to_string().contains("unburned"));
    }
}
