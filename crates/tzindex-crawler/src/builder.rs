//! Fluent builder API for crawler configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tzindex_crawler::CrawlerBuilder;
//!
//! let config = CrawlerBuilder::new()
//!     .chain_id("NetXdQprcVkpaWU")
//!     .queue(32)
//!     .delay(2)
//!     .stop_block(5_000_000)
//!     .poll_interval(Duration::from_secs(2))
//!     .build_config();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tzindex_rpc::RetryConfig;

use crate::config::CrawlerConfig;

/// Fluent builder for [`CrawlerConfig`].
#[derive(Default)]
pub struct CrawlerBuilder {
    config: CrawlerConfig,
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Require the node to serve this chain.
    pub fn chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.config.chain_id = chain_id.into();
        self
    }

    /// Set the lookahead depth.
    pub fn queue(mut self, depth: usize) -> Self {
        self.config.queue = depth.max(1);
        self
    }

    /// Stay `blocks` behind the node head.
    pub fn delay(mut self, blocks: i64) -> Self {
        self.config.delay = blocks.max(0);
        self
    }

    pub fn stop_block(mut self, height: i64) -> Self {
        self.config.stop_block = Some(height);
        self
    }

    pub fn enable_monitor(mut self, on: bool) -> Self {
        self.config.enable_monitor = on;
        self
    }

    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.config.poll_interval = every;
        self
    }

    /// Bound on retrying one failing fetch.
    pub fn fetch_deadline(mut self, deadline: Duration) -> Self {
        self.config.fetch_deadline = deadline;
        self
    }

    pub fn max_rollback_depth(mut self, depth: i64) -> Self {
        self.config.max_rollback_depth = depth;
        self
    }

    /// Enable or disable flow conservation checks.
    pub fn validate(mut self, on: bool) -> Self {
        self.config.validate = on;
        self
    }

    /// Write snapshots to `path` every `interval` blocks.
    pub fn snapshot_every(mut self, path: impl Into<PathBuf>, interval: i64) -> Self {
        self.config.snapshot.path = Some(path.into());
        self.config.snapshot.interval = interval;
        self
    }

    /// Also snapshot at `height`. Requires a path set via [`Self::snapshot_every`].
    pub fn snapshot_at(mut self, height: i64) -> Self {
        self.config.snapshot.blocks.push(height);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`CrawlerConfig`].
    pub fn build_config(self) -> CrawlerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = CrawlerBuilder::new().build_config();
        assert_eq!(cfg.queue, 16);
        assert_eq!(cfg.delay, 0);
        assert!(cfg.stop_block.is_none());
        assert!(cfg.enable_monitor);
    }

    #[test]
    fn builder_custom() {
        let cfg = CrawlerBuilder::new()
            .chain_id("NetXdQprcVkpaWU")
            .queue(0)
            .delay(-3)
            .stop_block(1_000)
            .enable_monitor(false)
            .max_rollback_depth(8)
            .validate(false)
            .snapshot_every("/var/tzindex/snap", 500)
            .snapshot_at(42)
            .build_config();

        assert_eq!(cfg.chain_id, "NetXdQprcVkpaWU");
        assert_eq!(cfg.queue, 1);
        assert_eq!(cfg.delay, 0);
        assert_eq!(cfg.stop_block, Some(1_000));
        assert!(!cfg.enable_monitor);
        assert_eq!(cfg.max_rollback_depth, 8);
        assert!(!cfg.validate);
        assert!(cfg.snapshot.is_snapshot_height(42));
        assert!(cfg.snapshot.is_snapshot_height(1_000));
    }
}
