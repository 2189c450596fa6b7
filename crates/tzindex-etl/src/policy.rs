//! Delegation offset policy.
//!
//! When a delegator pays fees or burns storage, its baker's delegated
//! balance shrinks by the same cost. How much is offset, and when, differs
//! between operation kinds, so the rule is looked up per kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tzindex_codec::OpKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetAmount {
    FeesAndBurn,
    FeesOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetTrigger {
    /// Any fee or burn.
    AnyCost,
    /// Only when a fee was paid.
    FeesPaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRule {
    pub amount: OffsetAmount,
    pub trigger: OffsetTrigger,
}

impl OffsetRule {
    pub const fn new(amount: OffsetAmount, trigger: OffsetTrigger) -> Self {
        Self { amount, trigger }
    }

    /// Offset owed for the given costs, `None` when the rule does not fire.
    pub fn offset(&self, fees: i64, burned: i64) -> Option<i64> {
        let fired = match self.trigger {
            OffsetTrigger::AnyCost => fees + burned > 0,
            OffsetTrigger::FeesPaid => fees > 0,
        };
        if !fired {
            return None;
        }
        let amount = match self.amount {
            OffsetAmount::FeesAndBurn => fees + burned,
            OffsetAmount::FeesOnly => fees,
        };
        (amount > 0).then_some(amount)
    }
}

impl Default for OffsetRule {
    fn default() -> Self {
        Self::new(OffsetAmount::FeesAndBurn, OffsetTrigger::AnyCost)
    }
}

/// Rule table keyed by operation kind with a fallback rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetPolicy {
    #[serde(default)]
    pub default: OffsetRule,
    #[serde(default)]
    pub rules: HashMap<OpKind, OffsetRule>,
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        Self {
            default: OffsetRule::default(),
            rules: HashMap::new(),
        }
        .with_rule(
            OpKind::TransferTicket,
            OffsetRule::new(OffsetAmount::FeesAndBurn, OffsetTrigger::FeesPaid),
        )
    }
}

impl OffsetPolicy {
    pub fn with_rule(mut self, kind: OpKind, rule: OffsetRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn rule(&self, kind: OpKind) -> OffsetRule {
        self.rules.get(&kind).copied().unwrap_or(self.default)
    }

    pub fn offset(&self, kind: OpKind, fees: i64, burned: i64) -> Option<i64> {
        self.rule(kind).offset(fees, burned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rule_covers_fees_and_burn() {
        let p = OffsetPolicy::default();
        assert_eq!(p.offset(OpKind::Transaction, 100, 50), Some(150));
        assert_eq!(p.offset(OpKind::Origination, 0, 64_250), Some(64_250));
        assert_eq!(p.offset(OpKind::Reveal, 0, 0), None);
    }

    #[test]
    fn transfer_ticket_requires_fee() {
        let p = OffsetPolicy::default();
        assert_eq!(p.offset(OpKind::TransferTicket, 0, 500), None);
        assert_eq!(p.offset(OpKind::TransferTicket, 10, 500), Some(510));
    }

    #[test]
    fn injected_rule_wins() {
        let p = OffsetPolicy::default().with_rule(
            OpKind::Transaction,
            OffsetRule::new(OffsetAmount::FeesOnly, OffsetTrigger::AnyCost),
        );
        assert_eq!(p.offset(OpKind::Transaction, 100, 50), Some(100));
        assert_eq!(p.offset(OpKind::Transaction, 0, 50), None);
    }

    #[test]
    fn policy_from_json() {
        let p: OffsetPolicy = serde_json::from_value(serde_json::json!({
            "rules": { "delegation": { "amount": "fees_only", "trigger": "fees_paid" } }
        }))
        .unwrap();
        assert_eq!(p.rule(OpKind::Delegation).amount, OffsetAmount::FeesOnly);
        assert_eq!(p.rule(OpKind::Transaction), OffsetRule::default());
    }
}
