//! The closed set of operation variants and their shared capabilities.
//!
//! Decoding reads the `kind` discriminator first and then deserializes the
//! matching variant. There is no trial decoding: an unknown kind, or a known
//! kind whose payload does not fit its variant, is an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{Address, AddressSet};
use crate::balance::BalanceUpdate;
use crate::error::DecodeError;
use crate::kind::OpKind;
use crate::micheline::{Prim, Script};
use crate::result::{InternalResult, OperationResult};

/// Contract call arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    pub value: Prim,
}

fn default_entrypoint() -> String {
    "default".to_string()
}

/// Receipt attached to an operation content.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OpMetadata {
    /// Fee updates for manager operations, rewards and penalties otherwise.
    #[serde(default)]
    pub balance_updates: Vec<BalanceUpdate>,
    #[serde(default, rename = "operation_result")]
    pub result: Option<OperationResult>,
    #[serde(default, rename = "internal_operation_results")]
    pub internal_results: Vec<InternalResult>,
    /// Consensus operations: the signing baker.
    #[serde(default)]
    pub delegate: Option<Address>,
    #[serde(default)]
    pub slots: Vec<i64>,
    #[serde(default)]
    pub endorsement_power: i64,
    #[serde(default)]
    pub preendorsement_power: i64,
    #[serde(default)]
    pub consensus_power: Option<Value>,
}

impl OpMetadata {
    /// Consensus power in whichever form the protocol reports it.
    pub fn power(&self) -> i64 {
        let consensus = match &self.consensus_power {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::Object(o)) => o.get("slots").and_then(Value::as_i64).unwrap_or(0),
            _ => 0,
        };
        consensus + self.endorsement_power + self.preendorsement_power + self.slots.len() as i64
    }
}

/// Fields shared by every manager operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manager {
    pub source: Address,
    #[serde(with = "crate::util::int_str")]
    pub fee: i64,
    #[serde(with = "crate::util::int_str")]
    pub counter: i64,
    #[serde(with = "crate::util::int_str")]
    pub gas_limit: i64,
    #[serde(with = "crate::util::int_str")]
    pub storage_limit: i64,
    pub metadata: OpMetadata,
}

// ─── Variants ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Activation {
    pub kind: OpKind,
    pub pkh: Address,
    pub secret: String,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DoubleBaking {
    pub kind: OpKind,
    pub bh1: Value,
    pub bh2: Value,
    #[serde(default)]
    pub metadata: OpMetadata,
}

/// Double (pre)endorsement and (pre)attestation evidence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DoubleEndorsement {
    pub kind: OpKind,
    pub op1: Value,
    pub op2: Value,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedNonce {
    pub kind: OpKind,
    pub level: i64,
    pub nonce: String,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VdfRevelation {
    pub kind: OpKind,
    #[serde(default)]
    pub solution: Vec<String>,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DrainDelegate {
    pub kind: OpKind,
    pub consensus_key: Address,
    pub delegate: Address,
    pub destination: Address,
    #[serde(default)]
    pub metadata: OpMetadata,
}

/// Every consensus kind: (pre)endorsements, (pre)attestations and DAL
/// attestations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endorsement {
    pub kind: OpKind,
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default)]
    pub slot: Option<i64>,
    #[serde(default)]
    pub round: Option<i64>,
    /// Wrapped form used by `endorsement_with_slot`.
    #[serde(default)]
    pub endorsement: Option<Value>,
    /// DAL attestations name the attestor directly.
    #[serde(default)]
    pub attestor: Option<Address>,
    #[serde(default)]
    pub metadata: OpMetadata,
}

impl Endorsement {
    pub fn level(&self) -> Option<i64> {
        self.level.or_else(|| {
            self.endorsement
                .as_ref()
                .and_then(|e| e.pointer("/operations/level"))
                .and_then(Value::as_i64)
        })
    }

    pub fn signer(&self) -> Option<&Address> {
        self.metadata.delegate.as_ref().or(self.attestor.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Proposals {
    pub kind: OpKind,
    pub source: Address,
    pub period: i64,
    pub proposals: Vec<String>,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ballot {
    pub kind: OpKind,
    pub source: Address,
    pub period: i64,
    pub proposal: String,
    pub ballot: String,
    #[serde(default)]
    pub metadata: OpMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reveal {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transaction {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    pub destination: Address,
    #[serde(with = "crate::util::int_str")]
    pub amount: i64,
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

impl Transaction {
    pub fn entrypoint(&self) -> &str {
        self.parameters
            .as_ref()
            .map(|p| p.entrypoint.as_str())
            .unwrap_or("default")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Origination {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    #[serde(with = "crate::util::int_str")]
    pub balance: i64,
    #[serde(default)]
    pub delegate: Option<Address>,
    #[serde(default)]
    pub script: Option<Script>,
    #[serde(default)]
    pub manager_pubkey: Option<Address>,
    #[serde(default, rename = "managerPubkey")]
    pub manager_pubkey_legacy: Option<Address>,
}

impl Origination {
    /// Manager key of pre-Babylon originations.
    pub fn manager_address(&self) -> Option<&Address> {
        self.manager_pubkey_legacy
            .as_ref()
            .or(self.manager_pubkey.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Delegation {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    #[serde(default)]
    pub delegate: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConstantRegistration {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    pub value: Prim,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetDepositsLimit {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    #[serde(default, with = "crate::util::opt_int_str")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncreasePaidStorage {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    #[serde(with = "crate::util::int_str")]
    pub amount: i64,
    pub destination: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferTicket {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    pub ticket_contents: Prim,
    pub ticket_ty: Prim,
    pub ticket_ticketer: Address,
    #[serde(with = "crate::util::int_str")]
    pub ticket_amount: i64,
    pub destination: Address,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateConsensusKey {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    pub pk: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Stakers {
    pub alice: Address,
    pub bob: Address,
}

/// Rollup and DAL manager operations that share one shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rollup {
    pub kind: OpKind,
    #[serde(flatten)]
    pub manager: Manager,
    #[serde(default)]
    pub rollup: Option<Address>,
    #[serde(default)]
    pub opponent: Option<Address>,
    #[serde(default)]
    pub staker: Option<Address>,
    #[serde(default)]
    pub stakers: Option<Stakers>,
}

// ─── Operation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Activation(Activation),
    DoubleBaking(DoubleBaking),
    DoubleEndorsement(DoubleEndorsement),
    SeedNonce(SeedNonce),
    VdfRevelation(VdfRevelation),
    DrainDelegate(DrainDelegate),
    Endorsement(Endorsement),
    Proposals(Proposals),
    Ballot(Ballot),
    Reveal(Reveal),
    Transaction(Transaction),
    Origination(Origination),
    Delegation(Delegation),
    RegisterConstant(ConstantRegistration),
    SetDepositsLimit(SetDepositsLimit),
    IncreasePaidStorage(IncreasePaidStorage),
    TransferTicket(TransferTicket),
    UpdateConsensusKey(UpdateConsensusKey),
    Rollup(Rollup),
}

fn typed<T: DeserializeOwned>(kind: OpKind, v: Value) -> Result<T, DecodeError> {
    serde_json::from_value(v).map_err(|e| DecodeError::InvalidOperation {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

impl Operation {
    /// Decode one operation content by its `kind` discriminator.
    pub fn decode(v: Value) -> Result<Operation, DecodeError> {
        let kind: OpKind = match v.get("kind") {
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(DecodeError::UnsupportedKind {
                    kind: other.to_string(),
                })
            }
            None => {
                return Err(DecodeError::UnsupportedKind {
                    kind: String::new(),
                })
            }
        };
        use OpKind as K;
        Ok(match kind {
            K::ActivateAccount => Operation::Activation(typed(kind, v)?),
            K::DoubleBakingEvidence => Operation::DoubleBaking(typed(kind, v)?),
            K::DoubleEndorsementEvidence
            | K::DoublePreendorsementEvidence
            | K::DoubleAttestationEvidence
            | K::DoublePreattestationEvidence => Operation::DoubleEndorsement(typed(kind, v)?),
            K::SeedNonceRevelation => Operation::SeedNonce(typed(kind, v)?),
            K::VdfRevelation => Operation::VdfRevelation(typed(kind, v)?),
            K::DrainDelegate => Operation::DrainDelegate(typed(kind, v)?),
            K::Endorsement
            | K::EndorsementWithSlot
            | K::Preendorsement
            | K::Attestation
            | K::Preattestation
            | K::AttestationWithDal
            | K::DalAttestation => Operation::Endorsement(typed(kind, v)?),
            K::Proposals => Operation::Proposals(typed(kind, v)?),
            K::Ballot => Operation::Ballot(typed(kind, v)?),
            K::Reveal => Operation::Reveal(typed(kind, v)?),
            K::Transaction => Operation::Transaction(typed(kind, v)?),
            K::Origination => Operation::Origination(typed(kind, v)?),
            K::Delegation => Operation::Delegation(typed(kind, v)?),
            K::RegisterGlobalConstant => Operation::RegisterConstant(typed(kind, v)?),
            K::SetDepositsLimit => Operation::SetDepositsLimit(typed(kind, v)?),
            K::IncreasePaidStorage => Operation::IncreasePaidStorage(typed(kind, v)?),
            K::TransferTicket => Operation::TransferTicket(typed(kind, v)?),
            K::UpdateConsensusKey => Operation::UpdateConsensusKey(typed(kind, v)?),
            K::DalPublishSlotHeader => Operation::Rollup(typed(kind, v)?),
            k if k.is_tx_rollup() || k.is_smart_rollup() => Operation::Rollup(typed(kind, v)?),
            k => {
                return Err(DecodeError::UnsupportedKind {
                    kind: k.to_string(),
                })
            }
        })
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Activation(o) => o.kind,
            Operation::DoubleBaking(o) => o.kind,
            Operation::DoubleEndorsement(o) => o.kind,
            Operation::SeedNonce(o) => o.kind,
            Operation::VdfRevelation(o) => o.kind,
            Operation::DrainDelegate(o) => o.kind,
            Operation::Endorsement(o) => o.kind,
            Operation::Proposals(o) => o.kind,
            Operation::Ballot(o) => o.kind,
            Operation::Reveal(o) => o.kind,
            Operation::Transaction(o) => o.kind,
            Operation::Origination(o) => o.kind,
            Operation::Delegation(o) => o.kind,
            Operation::RegisterConstant(o) => o.kind,
            Operation::SetDepositsLimit(o) => o.kind,
            Operation::IncreasePaidStorage(o) => o.kind,
            Operation::TransferTicket(o) => o.kind,
            Operation::UpdateConsensusKey(o) => o.kind,
            Operation::Rollup(o) => o.kind,
        }
    }

    pub fn manager(&self) -> Option<&Manager> {
        match self {
            Operation::Reveal(o) => Some(&o.manager),
            Operation::Transaction(o) => Some(&o.manager),
            Operation::Origination(o) => Some(&o.manager),
            Operation::Delegation(o) => Some(&o.manager),
            Operation::RegisterConstant(o) => Some(&o.manager),
            Operation::SetDepositsLimit(o) => Some(&o.manager),
            Operation::IncreasePaidStorage(o) => Some(&o.manager),
            Operation::TransferTicket(o) => Some(&o.manager),
            Operation::UpdateConsensusKey(o) => Some(&o.manager),
            Operation::Rollup(o) => Some(&o.manager),
            _ => None,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.manager().is_some()
    }

    pub fn metadata(&self) -> &OpMetadata {
        match self {
            Operation::Activation(o) => &o.metadata,
            Operation::DoubleBaking(o) => &o.metadata,
            Operation::DoubleEndorsement(o) => &o.metadata,
            Operation::SeedNonce(o) => &o.metadata,
            Operation::VdfRevelation(o) => &o.metadata,
            Operation::DrainDelegate(o) => &o.metadata,
            Operation::Endorsement(o) => &o.metadata,
            Operation::Proposals(o) => &o.metadata,
            Operation::Ballot(o) => &o.metadata,
            Operation::Reveal(o) => &o.manager.metadata,
            Operation::Transaction(o) => &o.manager.metadata,
            Operation::Origination(o) => &o.manager.metadata,
            Operation::Delegation(o) => &o.manager.metadata,
            Operation::RegisterConstant(o) => &o.manager.metadata,
            Operation::SetDepositsLimit(o) => &o.manager.metadata,
            Operation::IncreasePaidStorage(o) => &o.manager.metadata,
            Operation::TransferTicket(o) => &o.manager.metadata,
            Operation::UpdateConsensusKey(o) => &o.manager.metadata,
            Operation::Rollup(o) => &o.manager.metadata,
        }
    }

    /// The account that signed or triggered the operation.
    pub fn source(&self) -> Option<&Address> {
        match self {
            Operation::Activation(o) => Some(&o.pkh),
            Operation::DrainDelegate(o) => Some(&o.delegate),
            Operation::Endorsement(o) => o.signer(),
            Operation::Proposals(o) => Some(&o.source),
            Operation::Ballot(o) => Some(&o.source),
            _ => self.manager().map(|m| &m.source),
        }
    }

    /// Declared fee in mutez, zero for non-manager operations.
    pub fn fee(&self) -> i64 {
        self.manager().map(|m| m.fee).unwrap_or(0)
    }

    /// Metadata level balance updates: fee payment for manager operations,
    /// rewards and penalties for the others.
    pub fn fees(&self) -> &[BalanceUpdate] {
        &self.metadata().balance_updates
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.metadata().result.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.result().map(OperationResult::is_success).unwrap_or(true)
    }

    pub fn internal_results(&self) -> &[InternalResult] {
        &self.metadata().internal_results
    }

    /// Every balance update of the operation in receipt order: metadata,
    /// result, then internal results.
    pub fn balance_updates(&self) -> impl Iterator<Item = &BalanceUpdate> {
        self.fees()
            .iter()
            .chain(self.result().into_iter().flat_map(|r| r.balance_updates.iter()))
            .chain(
                self.internal_results()
                    .iter()
                    .flat_map(|r| r.result.balance_updates.iter()),
            )
    }

    /// Add every address named by the operation and its receipts.
    /// Addresses inside Micheline values are collected separately by
    /// [`Operation::collect_embedded`].
    pub fn addresses(&self, set: &mut AddressSet) {
        if let Some(src) = self.source() {
            set.insert(*src);
        }
        match self {
            Operation::DrainDelegate(o) => {
                set.insert(o.consensus_key);
                set.insert(o.destination);
            }
            Operation::Transaction(o) => {
                set.insert(o.destination);
            }
            Operation::Origination(o) => {
                if let Some(a) = o.manager_address() {
                    set.insert(*a);
                }
                if let Some(d) = &o.delegate {
                    set.insert(*d);
                }
            }
            Operation::Delegation(o) => {
                if let Some(d) = &o.delegate {
                    set.insert(*d);
                }
            }
            Operation::IncreasePaidStorage(o) => {
                set.insert(o.destination);
            }
            Operation::TransferTicket(o) => {
                set.insert(o.ticket_ticketer);
                set.insert(o.destination);
            }
            Operation::Rollup(o) => {
                let stakers = o.stakers.iter().flat_map(|s| [&s.alice, &s.bob]);
                for a in [&o.rollup, &o.opponent, &o.staker].into_iter().flatten().chain(stakers) {
                    set.insert(*a);
                }
            }
            _ => {}
        }
        if let Some(r) = self.result() {
            set.extend(r.originated_contracts.iter().copied());
            set.extend(r.rollup_address().copied());
        }
        for ir in self.internal_results() {
            set.insert(ir.source);
            set.extend(ir.destination);
            set.extend(ir.delegate);
            set.extend(ir.result.originated_contracts.iter().copied());
        }
        set.extend(self.balance_updates().filter_map(|u| u.address().copied()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TZ1: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const KT1: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";

    fn manager(kind: &str, extra: Value) -> Value {
        let mut v = json!({
            "kind": kind,
            "source": TZ1,
            "fee": "1420",
            "counter": "7",
            "gas_limit": "10600",
            "storage_limit": "300",
            "metadata": {
                "balance_updates": [
                    { "kind": "contract", "contract": TZ1, "change": "-1420", "origin": "block" },
                    { "kind": "accumulator", "category": "block fees", "change": "1420", "origin": "block" }
                ],
                "operation_result": { "status": "applied", "consumed_milligas": "1000" }
            }
        });
        if let (Value::Object(m), Value::Object(e)) = (&mut v, extra) {
            m.extend(e);
        }
        v
    }

    #[test]
    fn decodes_transaction() {
        let op = Operation::decode(manager(
            "transaction",
            json!({
                "amount": "1000000",
                "destination": KT1,
                "parameters": { "entrypoint": "mint", "value": { "int": "5" } }
            }),
        ))
        .unwrap();
        assert_eq!(op.kind(), OpKind::Transaction);
        assert!(op.is_manager() && op.is_success());
        assert_eq!(op.fee(), 1420);
        assert_eq!(op.fees().len(), 2);
        let Operation::Transaction(tx) = &op else {
            panic!("expected transaction");
        };
        assert_eq!(tx.amount, 1_000_000);
        assert_eq!(tx.entrypoint(), "mint");

        let mut set = AddressSet::new();
        op.addresses(&mut set);
        let listed: Vec<String> = set.iter().map(|a| a.to_string()).collect();
        assert_eq!(listed, vec![TZ1.to_string(), KT1.to_string()]);
    }

    #[test]
    fn every_supported_kind_dispatches() {
        for kind in OpKind::ALL.iter().filter(|k| !k.is_internal_only()) {
            let res = Operation::decode(json!({ "kind": kind.as_str() }));
            assert!(
                !matches!(res, Err(DecodeError::UnsupportedKind { .. })),
                "{kind} should reach its variant decoder"
            );
        }
    }

    #[test]
    fn unknown_and_missing_kinds_fail() {
        for v in [json!({ "kind": "bogus" }), json!({}), json!({ "kind": 5 }), json!({ "kind": "event" })] {
            let err = Operation::decode(v).unwrap_err();
            assert!(matches!(err, DecodeError::UnsupportedKind { .. }));
        }
    }

    #[test]
    fn failed_operation_still_exposes_fees() {
        let mut v = manager("delegation", json!({ "delegate": TZ1 }));
        v["metadata"]["operation_result"] = json!({
            "status": "failed",
            "errors": [{ "kind": "temporary", "id": "proto.delegate.unchanged" }]
        });
        let op = Operation::decode(v).unwrap();
        assert!(!op.is_success());
        assert_eq!(op.fees()[0].change, -1420);
        assert_eq!(op.result().unwrap().errors.len(), 1);
    }

    #[test]
    fn consensus_and_smart_rollup_shapes() {
        let op = Operation::decode(json!({
            "kind": "attestation",
            "slot": 3, "level": 100, "round": 0,
            "metadata": { "delegate": TZ1, "consensus_power": 12, "balance_updates": [] }
        }))
        .unwrap();
        assert_eq!(op.source().unwrap().to_string(), TZ1);
        assert_eq!(op.metadata().power(), 12);
        assert_eq!(op.fee(), 0);

        let rollup = Address::new(crate::address::AddressType::SmartRollup, [7; 20]);
        let op = Operation::decode(manager(
            "smart_rollup_timeout",
            json!({
                "rollup": rollup.to_string(),
                "stakers": { "alice": TZ1, "bob": KT1 }
            }),
        ))
        .unwrap();
        assert_eq!(op.kind(), OpKind::SmartRollupTimeout);
        let mut set = AddressSet::new();
        op.addresses(&mut set);
        assert!(set.contains(&rollup));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn missing_metadata_is_invalid_for_managers() {
        let mut v = manager("reveal", json!({ "public_key": "edpk" }));
        v.as_object_mut().unwrap().remove("metadata");
        assert!(matches!(
            Operation::decode(v),
            Err(DecodeError::InvalidOperation { kind, .. }) if kind == "reveal"
        ));
    }
}
