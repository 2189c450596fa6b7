//! Status events emitted by the crawler for observers.

use tzindex_core::{CrawlerState, ReorgType};

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlerEvent {
    StateChanged {
        from: CrawlerState,
        to: CrawlerState,
    },
    BlockConnected {
        height: i64,
        hash: String,
        cycle: i64,
    },
    ForkDetected {
        height: i64,
        depth: i64,
        reorg_type: ReorgType,
    },
    /// One stale block has been disconnected; the local tip is now `height`.
    RolledBack {
        height: i64,
        hash: String,
    },
    /// Caught up with the node head (minus the configured delay).
    Synced {
        height: i64,
    },
    Stopped {
        height: i64,
    },
}
