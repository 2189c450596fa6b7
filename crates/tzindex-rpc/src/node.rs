//! Typed access to the node endpoints the indexer consumes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tzindex_codec::{Address, Block, Script};

use crate::error::TransportError;
use crate::transport::{HealthStatus, RestTransport};

/// Block selector used in `chains/main/blocks/{id}` paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Head,
    Genesis,
    Level(i64),
    Hash(String),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Genesis => f.write_str("genesis"),
            Self::Level(h) => write!(f, "{h}"),
            Self::Hash(h) => f.write_str(h),
        }
    }
}

/// Block header as returned by `.../header` and the head monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub level: i64,
    pub proto: u32,
    pub predecessor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Status {
    pub bootstrapped: bool,
    #[serde(default)]
    pub sync_state: String,
}

impl Status {
    pub fn is_synced(&self) -> bool {
        self.bootstrapped && self.sync_state == "synced"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeVersion {
    pub major: i64,
    pub minor: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NetworkVersion {
    #[serde(default)]
    pub chain_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub version: NodeVersion,
    #[serde(default)]
    pub network_version: NetworkVersion,
}

/// Protocol constants from `context/constants`. Renamed fields of newer
/// protocols are accepted under their older names.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Constants {
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub blocks_per_cycle: i64,
    #[serde(
        default,
        alias = "blocks_per_stake_snapshot",
        with = "tzindex_codec::util::int_str"
    )]
    pub blocks_per_roll_snapshot: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub blocks_per_commitment: i64,
    #[serde(
        default,
        alias = "consensus_rights_delay",
        with = "tzindex_codec::util::int_str"
    )]
    pub preserved_cycles: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub cost_per_byte: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub origination_size: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub hard_gas_limit_per_operation: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub hard_storage_limit_per_operation: i64,
    #[serde(default, with = "tzindex_codec::util::int_str")]
    pub minimal_block_delay: i64,
}

pub type HeadStream = BoxStream<'static, Result<BlockHeaderInfo, TransportError>>;

/// Everything the crawler asks of a node.
#[async_trait]
pub trait NodeApi: Send + Sync + 'static {
    async fn chain_id(&self) -> Result<String, TransportError>;
    async fn status(&self) -> Result<Status, TransportError>;
    async fn version(&self) -> Result<VersionInfo, TransportError>;
    async fn header(&self, id: &BlockId) -> Result<BlockHeaderInfo, TransportError>;
    async fn block(&self, id: &BlockId) -> Result<Block, TransportError>;
    async fn constants(&self, id: &BlockId) -> Result<Constants, TransportError>;
    async fn contract_script(
        &self,
        address: &Address,
        id: &BlockId,
    ) -> Result<Script, TransportError>;
    /// New heads as the node adopts them.
    async fn monitor_heads(&self) -> Result<HeadStream, TransportError>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    fn url(&self) -> &str;
}

fn typed<T: DeserializeOwned>(v: Value) -> Result<T, TransportError> {
    Ok(serde_json::from_value(v)?)
}

/// [`NodeApi`] over any [`RestTransport`].
#[derive(Clone)]
pub struct Node {
    transport: Arc<dyn RestTransport>,
}

impl Node {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    fn block_path(id: &BlockId, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("chains/main/blocks/{id}")
        } else {
            format!("chains/main/blocks/{id}/{suffix}")
        }
    }
}

#[async_trait]
impl NodeApi for Node {
    async fn chain_id(&self) -> Result<String, TransportError> {
        typed(self.transport.get("chains/main/chain_id").await?)
    }

    async fn status(&self) -> Result<Status, TransportError> {
        typed(self.transport.get("chains/main/is_bootstrapped").await?)
    }

    async fn version(&self) -> Result<VersionInfo, TransportError> {
        typed(self.transport.get("version").await?)
    }

    async fn header(&self, id: &BlockId) -> Result<BlockHeaderInfo, TransportError> {
        typed(self.transport.get(&Self::block_path(id, "header")).await?)
    }

    async fn block(&self, id: &BlockId) -> Result<Block, TransportError> {
        let v = self.transport.get(&Self::block_path(id, "")).await?;
        Ok(Block::from_value(v)?)
    }

    async fn constants(&self, id: &BlockId) -> Result<Constants, TransportError> {
        typed(
            self.transport
                .get(&Self::block_path(id, "context/constants"))
                .await?,
        )
    }

    async fn contract_script(
        &self,
        address: &Address,
        id: &BlockId,
    ) -> Result<Script, TransportError> {
        let path = Self::block_path(id, &format!("context/contracts/{address}/script"));
        typed(self.transport.get(&path).await?)
    }

    async fn monitor_heads(&self) -> Result<HeadStream, TransportError> {
        let raw = self.transport.stream("monitor/heads/main").await?;
        Ok(raw.map(|item| item.and_then(typed::<BlockHeaderInfo>)).boxed())
    }

    fn health(&self) -> HealthStatus {
        self.transport.health()
    }

    fn url(&self) -> &str {
        self.transport.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::JsonStream;
    use serde_json::json;
    use std::collections::HashMap;

    struct MockTransport {
        responses: HashMap<String, Value>,
        heads: Vec<Value>,
    }

    #[async_trait]
    impl RestTransport for MockTransport {
        async fn get(&self, path: &str) -> Result<Value, TransportError> {
            self.responses
                .get(path)
                .cloned()
                .ok_or_else(|| TransportError::NotFound {
                    path: path.to_string(),
                })
        }

        async fn stream(&self, _path: &str) -> Result<JsonStream, TransportError> {
            Ok(futures::stream::iter(self.heads.clone().into_iter().map(Ok)).boxed())
        }

        fn url(&self) -> &str {
            "mock://node"
        }
    }

    fn header(level: i64) -> Value {
        json!({
            "hash": format!("B{level}"), "level": level, "proto": 19,
            "predecessor": format!("B{}", level - 1), "timestamp": "2024-06-01T12:00:00Z"
        })
    }

    fn node(responses: Vec<(&str, Value)>) -> Node {
        Node::new(Arc::new(MockTransport {
            responses: responses
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            heads: vec![header(10), header(11)],
        }))
    }

    #[tokio::test]
    async fn typed_endpoints() {
        let n = node(vec![
            ("chains/main/chain_id", json!("NetXdQprcVkpaWU")),
            ("chains/main/is_bootstrapped", json!({ "bootstrapped": true, "sync_state": "synced" })),
            ("chains/main/blocks/head/header", header(42)),
            ("chains/main/blocks/42/context/constants", json!({
                "blocks_per_cycle": 16384, "blocks_per_stake_snapshot": 1024,
                "consensus_rights_delay": 2, "cost_per_byte": "250", "origination_size": 257
            })),
        ]);
        assert_eq!(n.chain_id().await.unwrap(), "NetXdQprcVkpaWU");
        assert!(n.status().await.unwrap().is_synced());
        assert_eq!(n.header(&BlockId::Head).await.unwrap().level, 42);
        let c = n.constants(&BlockId::Level(42)).await.unwrap();
        assert_eq!(c.blocks_per_cycle, 16384);
        assert_eq!(c.blocks_per_roll_snapshot, 1024);
        assert_eq!(c.preserved_cycles, 2);
        assert_eq!(c.cost_per_byte, 250);
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let n = node(vec![]);
        let err = n.block(&BlockId::Level(7)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn bad_block_payload_is_decode_error() {
        let n = node(vec![(
            "chains/main/blocks/5",
            json!({
                "hash": "B5",
                "header": header(5),
                "operations": [[{ "hash": "o", "branch": "B4", "contents": [{ "kind": "nope" }] }]]
            }),
        )]);
        let err = n.block(&BlockId::Level(5)).await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn monitor_yields_headers() {
        let n = node(vec![]);
        let heads: Vec<_> = n.monitor_heads().await.unwrap().collect().await;
        let levels: Vec<i64> = heads.into_iter().map(|h| h.unwrap().level).collect();
        assert_eq!(levels, vec![10, 11]);
    }
}
