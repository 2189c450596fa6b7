//! Crawler configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tzindex_rpc::policy::duration_ms;
use tzindex_rpc::RetryConfig;

/// Configuration for a crawler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Expected chain id. Empty accepts whatever the node reports on first
    /// start; stored tips still pin the chain on restart.
    #[serde(default)]
    pub chain_id: String,
    /// Lookahead depth: blocks fetched ahead of the one being committed.
    #[serde(default = "default_queue")]
    pub queue: usize,
    /// Number of blocks to stay behind the node head.
    #[serde(default)]
    pub delay: i64,
    /// Stop cleanly after committing this height. `None` = run forever.
    #[serde(default)]
    pub stop_block: Option<i64>,
    /// Wait on the node's head monitor instead of polling when caught up.
    #[serde(default = "default_true")]
    pub enable_monitor: bool,
    /// Head polling interval while caught up.
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Give up on a block fetch that keeps failing for this long.
    #[serde(default = "default_fetch_deadline", with = "duration_ms")]
    pub fetch_deadline: Duration,
    /// Deepest fork the crawler will roll back before halting.
    #[serde(default = "default_max_rollback_depth")]
    pub max_rollback_depth: i64,
    /// Run flow conservation checks on every operation group.
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_queue() -> usize {
    16
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_fetch_deadline() -> Duration {
    Duration::from_secs(300)
}
fn default_max_rollback_depth() -> i64 {
    128
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            queue: default_queue(),
            delay: 0,
            stop_block: None,
            enable_monitor: true,
            poll_interval: default_poll_interval(),
            fetch_deadline: default_fetch_deadline(),
            max_rollback_depth: default_max_rollback_depth(),
            validate: true,
            snapshot: SnapshotConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl CrawlerConfig {
    /// Returns `true` once `height` reaches the configured stop block.
    pub fn is_stop_height(&self, height: i64) -> bool {
        self.stop_block.is_some_and(|s| height >= s)
    }
}

/// Periodic state snapshots for fast resync. Best effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Target directory. Snapshots are disabled without one.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Explicit heights to snapshot at.
    #[serde(default)]
    pub blocks: Vec<i64>,
    /// Snapshot every N blocks; 0 disables.
    #[serde(default)]
    pub interval: i64,
}

impl SnapshotConfig {
    pub fn is_enabled(&self) -> bool {
        self.path.is_some() && (!self.blocks.is_empty() || self.interval > 0)
    }

    pub fn is_snapshot_height(&self, height: i64) -> bool {
        if self.path.is_none() {
            return false;
        }
        self.blocks.contains(&height) || (self.interval > 0 && height % self.interval == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let cfg: CrawlerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.queue, 16);
        assert_eq!(cfg.max_rollback_depth, 128);
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert!(cfg.validate);
        assert!(!cfg.snapshot.is_enabled());
    }

    #[test]
    fn durations_in_millis() {
        let cfg: CrawlerConfig =
            serde_json::from_str(r#"{"poll_interval": 250, "fetch_deadline": 1000, "stop_block": 42}"#)
                .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.fetch_deadline, Duration::from_secs(1));
        assert!(cfg.is_stop_height(42));
        assert!(!cfg.is_stop_height(41));
    }

    #[test]
    fn snapshot_heights() {
        let snap = SnapshotConfig {
            path: Some("/tmp/snap".into()),
            blocks: vec![7],
            interval: 100,
        };
        assert!(snap.is_enabled());
        assert!(snap.is_snapshot_height(7));
        assert!(snap.is_snapshot_height(300));
        assert!(!snap.is_snapshot_height(301));

        let off = SnapshotConfig {
            path: None,
            ..snap
        };
        assert!(!off.is_snapshot_height(300));
    }
}
