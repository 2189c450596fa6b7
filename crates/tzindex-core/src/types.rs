//! Shared types for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block, enough to track the local chain and walk
/// back to a common ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block height (level).
    pub height: i64,
    /// Block hash (`B…`).
    pub hash: String,
    /// Predecessor block hash.
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    /// Cycle the block belongs to.
    pub cycle: i64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.height == parent.height + 1 && self.parent_hash == parent.hash
    }
}

/// Access to the identity of a block, implemented by the ledger's block model.
pub trait ChainBlock {
    fn height(&self) -> i64;
    fn hash(&self) -> &str;
    fn parent_hash(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
    fn cycle(&self) -> i64;

    fn summary(&self) -> BlockSummary {
        BlockSummary {
            height: self.height(),
            hash: self.hash().to_string(),
            parent_hash: self.parent_hash().to_string(),
            timestamp: self.timestamp(),
            cycle: self.cycle(),
        }
    }
}

impl ChainBlock for BlockSummary {
    fn height(&self) -> i64 {
        self.height
    }
    fn hash(&self) -> &str {
        &self.hash
    }
    fn parent_hash(&self) -> &str {
        &self.parent_hash
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn cycle(&self) -> i64 {
        self.cycle
    }
}

// ─── ChainTip ─────────────────────────────────────────────────────────────────

/// Best block as seen by one table. Written only after a block has been
/// committed to every index module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub chain_id: String,
    pub best_height: i64,
    pub best_hash: String,
    pub best_time: DateTime<Utc>,
}

impl ChainTip {
    pub fn new(chain_id: impl Into<String>, block: &BlockSummary) -> Self {
        Self {
            chain_id: chain_id.into(),
            best_height: block.height,
            best_hash: block.hash.clone(),
            best_time: block.timestamp,
        }
    }

    /// Move the tip to `block`, which may be higher (connect) or lower (rollback).
    pub fn update(&mut self, block: &BlockSummary) {
        self.best_height = block.height;
        self.best_hash = block.hash.clone();
        self.best_time = block.timestamp;
    }

    /// Returns `true` if `summary` is the block this tip points at.
    pub fn is_at(&self, summary: &BlockSummary) -> bool {
        self.best_height == summary.height && self.best_hash == summary.hash
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn s(height: i64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            height,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: DateTime::from_timestamp(height * 30, 0).unwrap(),
            cycle: height / 4096,
        }
    }

    #[test]
    fn block_extends_parent() {
        let parent = s(100, "BLa", "BL0");
        let child = s(101, "BLb", "BLa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = s(100, "BLa", "BL0");
        let b = s(102, "BLc", "BLa");
        assert!(!b.extends(&a));
    }

    #[test]
    fn tip_follows_blocks() {
        let mut tip = ChainTip::new("NetXdQprcVkpaWU", &s(10, "BLa", "BL9"));
        assert!(tip.is_at(&s(10, "BLa", "BL9")));
        tip.update(&s(11, "BLb", "BLa"));
        assert_eq!(tip.best_height, 11);
        assert_eq!(tip.best_hash, "BLb");
        tip.update(&s(10, "BLa", "BL9"));
        assert_eq!(tip.best_height, 10);
    }

    #[test]
    fn summary_from_chain_block() {
        let b = s(5, "BL5", "BL4");
        assert_eq!(b.summary(), b);
    }
}
