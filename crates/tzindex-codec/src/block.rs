//! Full block receipts: header, metadata and the validation passes of
//! operation groups.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::address::Address;
use crate::balance::BalanceUpdate;
use crate::error::DecodeError;
use crate::operation::Operation;
use crate::result::ImplicitResult;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Header {
    pub level: i64,
    pub proto: u32,
    pub predecessor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub validation_pass: u32,
    #[serde(default)]
    pub payload_round: Option<i64>,
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LevelInfo {
    pub level: i64,
    #[serde(default)]
    pub level_position: i64,
    #[serde(default)]
    pub cycle: i64,
    #[serde(default)]
    pub cycle_position: i64,
    #[serde(default)]
    pub expected_commitment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub next_protocol: String,
    #[serde(default)]
    pub level_info: Option<LevelInfo>,
    /// Pre-v008 name of `level_info`. Some protocols send both.
    #[serde(default, rename = "level")]
    pub legacy_level: Option<LevelInfo>,
    #[serde(default)]
    pub baker: Option<Address>,
    #[serde(default)]
    pub proposer: Option<Address>,
    #[serde(default)]
    pub balance_updates: Vec<BalanceUpdate>,
    #[serde(default, rename = "implicit_operations_results")]
    pub implicit_results: Vec<ImplicitResult>,
    #[serde(default)]
    pub deactivated: Vec<Address>,
}

/// One signed batch of operation contents.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationGroup {
    pub hash: String,
    pub branch: String,
    pub contents: Vec<Operation>,
}

/// Position of one operation content inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpRef {
    /// Validation pass (0 consensus, 1 governance, 2 anonymous, 3 manager).
    pub pass: usize,
    pub group: usize,
    pub content: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub protocol: String,
    pub chain_id: String,
    pub hash: String,
    pub header: Header,
    pub metadata: Metadata,
    pub operations: Vec<Vec<OperationGroup>>,
}

#[derive(Deserialize)]
struct RawGroup {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    contents: Vec<Value>,
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    chain_id: String,
    hash: String,
    header: Header,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    operations: Vec<Vec<RawGroup>>,
}

impl Metadata {
    pub fn level_info(&self) -> Option<&LevelInfo> {
        self.level_info.as_ref().or(self.legacy_level.as_ref())
    }
}

impl Block {
    /// Decode a block from its JSON form. Any operation that fails to decode
    /// fails the whole block.
    pub fn from_value(v: Value) -> Result<Block, DecodeError> {
        let raw: RawBlock = serde_json::from_value(v)?;
        let mut operations = Vec::with_capacity(raw.operations.len());
        for pass in raw.operations {
            let mut groups = Vec::with_capacity(pass.len());
            for g in pass {
                let contents = g
                    .contents
                    .into_iter()
                    .map(Operation::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push(OperationGroup {
                    hash: g.hash,
                    branch: g.branch,
                    contents,
                });
            }
            operations.push(groups);
        }
        Ok(Block {
            protocol: raw.protocol,
            chain_id: raw.chain_id,
            hash: raw.hash,
            header: raw.header,
            metadata: raw.metadata,
            operations,
        })
    }

    pub fn from_slice(b: &[u8]) -> Result<Block, DecodeError> {
        Self::from_value(serde_json::from_slice(b)?)
    }

    pub fn height(&self) -> i64 {
        self.header.level
    }

    pub fn predecessor(&self) -> &str {
        &self.header.predecessor
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    pub fn cycle(&self) -> i64 {
        self.metadata.level_info().map(|l| l.cycle).unwrap_or(0)
    }

    pub fn cycle_position(&self) -> i64 {
        self.metadata
            .level_info()
            .map(|l| l.cycle_position)
            .unwrap_or(0)
    }

    pub fn baker(&self) -> Option<&Address> {
        self.metadata.baker.as_ref()
    }

    /// Payload proposer, falling back to the baker before Tenderbake.
    pub fn proposer(&self) -> Option<&Address> {
        self.metadata.proposer.as_ref().or(self.metadata.baker.as_ref())
    }

    /// All operation contents in block order.
    pub fn ops(&self) -> impl Iterator<Item = (OpRef, &OperationGroup, &Operation)> {
        self.operations.iter().enumerate().flat_map(|(pass, groups)| {
            groups.iter().enumerate().flat_map(move |(group, g)| {
                g.contents.iter().enumerate().map(move |(content, op)| {
                    (OpRef { pass, group, content }, g, op)
                })
            })
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = (usize, usize, &OperationGroup)> {
        self.operations
            .iter()
            .enumerate()
            .flat_map(|(pass, groups)| groups.iter().enumerate().map(move |(i, g)| (pass, i, g)))
    }

    pub fn op_count(&self) -> usize {
        self.operations
            .iter()
            .flat_map(|p| p.iter())
            .map(|g| g.contents.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::OpKind;
    use serde_json::json;

    const TZ1: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";

    fn block(contents: Value) -> Value {
        json!({
            "protocol": "PtParisBxoLz5gzMmn3d9WBQNoPSZakgnkMC2VNuQ3KXfUtUQeZ",
            "chain_id": "NetXdQprcVkpaWU",
            "hash": "BLockHashAtHeight100",
            "header": {
                "level": 100, "proto": 19, "predecessor": "BLockHashAtHeight99",
                "timestamp": "2024-06-01T12:00:00Z", "validation_pass": 4
            },
            "metadata": {
                "level_info": { "level": 100, "level_position": 99, "cycle": 3, "cycle_position": 3 },
                "baker": TZ1,
                "balance_updates": [
                    { "kind": "minted", "category": "baking rewards", "change": "-5000000" },
                    { "kind": "contract", "contract": TZ1, "change": "5000000" }
                ],
                "implicit_operations_results": []
            },
            "operations": [[], [], [], [{ "hash": "opHash1", "branch": "BLockHashAtHeight99",
                                            "contents": contents }]]
        })
    }

    #[test]
    fn decode_block_and_iterate() {
        let b = Block::from_value(block(json!([{
            "kind": "reveal", "source": TZ1, "fee": "300", "counter": "1",
            "gas_limit": "1000", "storage_limit": "0", "public_key": "edpk",
            "metadata": { "balance_updates": [], "operation_result": { "status": "applied" } }
        }])))
        .unwrap();
        assert_eq!(b.height(), 100);
        assert_eq!(b.cycle(), 3);
        assert_eq!(b.predecessor(), "BLockHashAtHeight99");
        assert_eq!(b.baker().unwrap().to_string(), TZ1);
        assert_eq!(b.op_count(), 1);
        let (pos, group, op) = b.ops().next().unwrap();
        assert_eq!(pos, OpRef { pass: 3, group: 0, content: 0 });
        assert_eq!(group.hash, "opHash1");
        assert_eq!(op.kind(), OpKind::Reveal);
    }

    #[test]
    fn unsupported_operation_fails_block() {
        let err = Block::from_value(block(json!([{ "kind": "mystery" }]))).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedKind { .. }));
    }

    #[test]
    fn legacy_level_field() {
        let mut v = block(json!([]));
        let meta = v["metadata"].as_object_mut().unwrap();
        let info = meta.remove("level_info").unwrap();
        meta.insert("level".into(), info);
        let b = Block::from_value(v).unwrap();
        assert_eq!(b.cycle_position(), 3);
    }

    #[test]
    fn both_level_forms_present() {
        let mut v = block(json!([]));
        v["metadata"]["level"] = json!({ "level": 100, "cycle": 9, "cycle_position": 1 });
        let b = Block::from_value(v).unwrap();
        assert_eq!(b.cycle(), 3);
    }
}
