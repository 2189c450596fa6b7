//! Fork detection.
//!
//! Three ways the local chain can turn out stale:
//! 1. **Predecessor mismatch**: the next block does not build on the local tip
//! 2. **Replaced head**: the node reports a different block at a height we already hold
//! 3. **Node rewind**: the node's head drops below the local tip (node switch or restore)

use crate::types::BlockSummary;

/// Describes a detected fork.
#[derive(Debug, Clone)]
pub struct ReorgEvent {
    /// Height at which the divergence was observed.
    pub detected_at: i64,
    /// Locally held blocks known to be stale, most recent first. May be
    /// incomplete when the fork is deeper than the tracked window.
    pub dropped_blocks: Vec<BlockSummary>,
    pub depth: i64,
    pub reorg_type: ReorgType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgType {
    PredecessorMismatch,
    ReplacedHead,
    NodeRewound,
}

impl std::fmt::Display for ReorgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PredecessorMismatch => write!(f, "predecessor mismatch"),
            Self::ReplacedHead => write!(f, "replaced head"),
            Self::NodeRewound => write!(f, "node rewound"),
        }
    }
}

/// Detects and classifies forks against the local block window.
#[derive(Debug, Default)]
pub struct ReorgDetector;

impl ReorgDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `new_block` builds on `local_tip`.
    pub fn check(
        &self,
        new_block: &BlockSummary,
        local_tip: &BlockSummary,
        window: &[BlockSummary],
    ) -> Option<ReorgEvent> {
        if new_block.extends(local_tip) {
            return None;
        }
        // a block at or below the tip replaces local history as well
        let reorg_type = if new_block.height <= local_tip.height {
            ReorgType::ReplacedHead
        } else {
            ReorgType::PredecessorMismatch
        };
        let dropped = find_dropped_blocks(new_block, window);
        let depth = dropped.len() as i64;
        tracing::warn!(
            depth,
            at = new_block.height,
            reorg_type = %reorg_type,
            "Fork detected"
        );
        Some(ReorgEvent {
            detected_at: new_block.height,
            dropped_blocks: dropped,
            depth,
            reorg_type,
        })
    }

    /// Compare the node's block at a height we already hold with our copy.
    pub fn check_replaced(
        &self,
        node_block: &BlockSummary,
        window: &[BlockSummary],
    ) -> Option<ReorgEvent> {
        let local = window.iter().find(|b| b.height == node_block.height)?;
        if local.hash == node_block.hash {
            return None;
        }
        let dropped: Vec<_> = window
            .iter()
            .rev()
            .filter(|b| b.height >= node_block.height)
            .cloned()
            .collect();
        let depth = dropped.len() as i64;
        tracing::warn!(
            depth,
            at = node_block.height,
            local = %local.hash,
            remote = %node_block.hash,
            "Node reports a different block at a known height"
        );
        Some(ReorgEvent {
            detected_at: node_block.height,
            dropped_blocks: dropped,
            depth,
            reorg_type: ReorgType::ReplacedHead,
        })
    }

    /// Detect the node's head sitting below the local tip.
    pub fn check_node_head(
        &self,
        node_head: i64,
        window: &[BlockSummary],
    ) -> Option<ReorgEvent> {
        let tip = window.last()?;
        if node_head >= tip.height {
            return None;
        }
        let dropped: Vec<_> = window
            .iter()
            .rev()
            .filter(|b| b.height > node_head)
            .cloned()
            .collect();
        tracing::warn!(
            local_tip = tip.height,
            node_head,
            "Node head is below the local tip"
        );
        Some(ReorgEvent {
            detected_at: node_head,
            depth: dropped.len() as i64,
            dropped_blocks: dropped,
            reorg_type: ReorgType::NodeRewound,
        })
    }
}

/// Walk the window backward until the new block's predecessor is found.
fn find_dropped_blocks(new_block: &BlockSummary, window: &[BlockSummary]) -> Vec<BlockSummary> {
    let mut dropped = Vec::new();
    for block in window.iter().rev() {
        if block.hash == new_block.parent_hash {
            break;
        }
        dropped.push(block.clone());
    }
    dropped
}
