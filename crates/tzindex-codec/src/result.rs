//! Execution receipts for external, internal and implicit operations.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::balance::BalanceUpdate;
use crate::bigmap::{self, BigmapEvent, LazyDiff, LegacyDiff};
use crate::kind::OpKind;
use crate::micheline::{Prim, Script};
use crate::operation::Parameters;
use crate::ticket::TicketUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    #[default]
    Applied,
    Failed,
    Backtracked,
    Skipped,
}

/// Generic result envelope. Which fields are set depends on the operation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawResult")]
pub struct OperationResult {
    pub status: OpStatus,
    pub balance_updates: Vec<BalanceUpdate>,
    pub consumed_gas: i64,
    pub consumed_milligas: i64,
    pub errors: Vec<serde_json::Value>,
    pub allocated_destination_contract: bool,
    pub storage: Option<Prim>,
    pub originated_contracts: Vec<Address>,
    pub storage_size: i64,
    pub paid_storage_size_diff: i64,
    pub bigmap_events: Vec<BigmapEvent>,
    pub ticket_updates: Vec<TicketUpdate>,
    /// Global constant hash for `register_global_constant`.
    pub global_address: Option<String>,
    /// Rollup address for rollup originations.
    pub address: Option<Address>,
    /// Legacy tx rollup originations report the address here.
    pub originated_rollup: Option<Address>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.status == OpStatus::Applied
    }

    /// Gas units, rounding milligas up.
    pub fn gas(&self) -> i64 {
        if self.consumed_milligas > 0 {
            (self.consumed_milligas + 999) / 1000
        } else {
            self.consumed_gas
        }
    }

    pub fn milli_gas(&self) -> i64 {
        if self.consumed_milligas > 0 {
            self.consumed_milligas
        } else {
            self.consumed_gas * 1000
        }
    }

    /// Address of a rollup created by this result.
    pub fn rollup_address(&self) -> Option<&Address> {
        self.address.as_ref().or(self.originated_rollup.as_ref())
    }
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    status: OpStatus,
    #[serde(default)]
    balance_updates: Vec<BalanceUpdate>,
    #[serde(default, with = "crate::util::opt_int_str")]
    consumed_gas: Option<i64>,
    #[serde(default, with = "crate::util::opt_int_str")]
    consumed_milligas: Option<i64>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    #[serde(default)]
    allocated_destination_contract: bool,
    #[serde(default)]
    storage: Option<Prim>,
    #[serde(default)]
    originated_contracts: Vec<Address>,
    #[serde(default, with = "crate::util::opt_int_str")]
    storage_size: Option<i64>,
    #[serde(default, with = "crate::util::opt_int_str")]
    paid_storage_size_diff: Option<i64>,
    #[serde(default)]
    big_map_diff: Option<Vec<LegacyDiff>>,
    #[serde(default)]
    lazy_storage_diff: Option<Vec<LazyDiff>>,
    #[serde(default)]
    ticket_updates: Vec<TicketUpdate>,
    #[serde(default)]
    ticket_receipt: Vec<TicketUpdate>,
    #[serde(default)]
    global_address: Option<String>,
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    originated_rollup: Option<Address>,
}

impl From<RawResult> for OperationResult {
    fn from(r: RawResult) -> Self {
        // external receipts use `ticket_updates`, internal ones `ticket_receipt`
        let ticket_updates = if r.ticket_updates.is_empty() {
            r.ticket_receipt
        } else {
            r.ticket_updates
        };
        Self {
            status: r.status,
            balance_updates: r.balance_updates,
            consumed_gas: r.consumed_gas.unwrap_or(0),
            consumed_milligas: r.consumed_milligas.unwrap_or(0),
            errors: r.errors,
            allocated_destination_contract: r.allocated_destination_contract,
            storage: r.storage,
            originated_contracts: r.originated_contracts,
            storage_size: r.storage_size.unwrap_or(0),
            paid_storage_size_diff: r.paid_storage_size_diff.unwrap_or(0),
            bigmap_events: bigmap::events(r.lazy_storage_diff, r.big_map_diff),
            ticket_updates,
            global_address: r.global_address,
            address: r.address,
            originated_rollup: r.originated_rollup,
        }
    }
}

/// Receipt of an operation emitted by contract execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InternalResult {
    pub kind: OpKind,
    pub source: Address,
    #[serde(default, with = "crate::util::int_str")]
    pub nonce: i64,
    pub result: OperationResult,
    #[serde(default)]
    pub destination: Option<Address>,
    #[serde(default)]
    pub delegate: Option<Address>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default, with = "crate::util::int_str")]
    pub amount: i64,
    #[serde(default, with = "crate::util::int_str")]
    pub balance: i64,
    #[serde(default)]
    pub script: Option<Script>,
    /// Event type, payload and tag for `event` results.
    #[serde(default, rename = "type")]
    pub event_type: Option<Prim>,
    #[serde(default)]
    pub payload: Option<Prim>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl InternalResult {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn entrypoint(&self) -> &str {
        self.parameters
            .as_ref()
            .map(|p| p.entrypoint.as_str())
            .unwrap_or("default")
    }
}

/// Protocol-initiated results listed in block metadata (migrations,
/// liquidity baking subsidy).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImplicitResult {
    pub kind: OpKind,
    #[serde(default)]
    pub script: Option<Script>,
    #[serde(flatten)]
    pub result: OperationResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gas_rounds_milligas_up() {
        let r: OperationResult =
            serde_json::from_value(json!({ "status": "applied", "consumed_milligas": "1001" }))
                .unwrap();
        assert_eq!(r.gas(), 2);
        assert_eq!(r.milli_gas(), 1001);

        let r: OperationResult =
            serde_json::from_value(json!({ "status": "applied", "consumed_gas": "10" })).unwrap();
        assert_eq!(r.gas(), 10);
        assert_eq!(r.milli_gas(), 10_000);
    }

    #[test]
    fn ticket_receipt_alias() {
        let token = json!({
            "ticketer": "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn",
            "content_type": { "prim": "unit" },
            "content": { "prim": "Unit" }
        });
        let r: OperationResult = serde_json::from_value(json!({
            "status": "backtracked",
            "ticket_receipt": [{ "ticket_token": token, "updates": [] }]
        }))
        .unwrap();
        assert_eq!(r.ticket_updates.len(), 1);
        assert!(!r.is_success());
    }

    #[test]
    fn implicit_result_flattens_envelope() {
        let r: ImplicitResult = serde_json::from_value(json!({
            "kind": "transaction",
            "storage": { "int": "1" },
            "balance_updates": [
                { "kind": "minted", "category": "subsidy", "change": "-2500000" },
                { "kind": "contract", "contract": "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn", "change": "2500000" }
            ],
            "consumed_milligas": "2000",
            "storage_size": "4632"
        }))
        .unwrap();
        assert_eq!(r.kind, OpKind::Transaction);
        assert_eq!(r.result.balance_updates.len(), 2);
        assert_eq!(r.result.storage_size, 4632);
        assert_eq!(r.result.gas(), 2);
    }

    #[test]
    fn internal_event() {
        let r: InternalResult = serde_json::from_value(json!({
            "kind": "event",
            "source": "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn",
            "nonce": 3,
            "type": { "prim": "nat" },
            "tag": "minted",
            "payload": { "int": "7" },
            "result": { "status": "applied", "consumed_milligas": "100" }
        }))
        .unwrap();
        assert_eq!(r.kind, OpKind::Event);
        assert_eq!(r.tag.as_deref(), Some("minted"));
        assert_eq!(r.entrypoint(), "default");
    }
}
