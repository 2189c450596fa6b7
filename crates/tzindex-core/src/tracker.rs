//! Block tracker: keeps a sliding window of recently committed blocks so
//! fork detection can find the common ancestor without touching the store.

use std::collections::VecDeque;

use crate::types::BlockSummary;

/// Tracks the last N committed blocks.
pub struct BlockTracker {
    /// Oldest first.
    window: VecDeque<BlockSummary>,
    window_size: usize,
}

impl BlockTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Add a committed block.
    ///
    /// Returns `Err(depth)` if the block does not extend the current head,
    /// where `depth` is the number of tracked blocks that would be dropped.
    pub fn push(&mut self, block: BlockSummary) -> Result<(), i64> {
        if let Some(head) = self.window.back() {
            if !block.extends(head) {
                return Err(self.find_fork_depth(&block));
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(block);
        Ok(())
    }

    pub fn head(&self) -> Option<&BlockSummary> {
        self.window.back()
    }

    /// Returns a block by height if it's still in the window.
    pub fn get(&self, height: i64) -> Option<&BlockSummary> {
        self.window.iter().rev().find(|b| b.height == height)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Oldest-first view of the window.
    pub fn window(&self) -> Vec<BlockSummary> {
        self.window.iter().cloned().collect()
    }

    /// Drop every block above `height`.
    pub fn rewind_to(&mut self, height: i64) {
        while let Some(back) = self.window.back() {
            if back.height > height {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    fn find_fork_depth(&self, new_block: &BlockSummary) -> i64 {
        for (i, tracked) in self.window.iter().enumerate().rev() {
            if tracked.hash == new_block.parent_hash {
                return (self.window.len() - 1 - i) as i64;
            }
        }
        self.window.len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn block(height: i64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            height,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: DateTime::from_timestamp(height * 30, 0).unwrap(),
            cycle: 0,
        }
    }

    fn chain(tracker: &mut BlockTracker, from: i64, to: i64) {
        for i in from..=to {
            tracker
                .push(block(i, &format!("BL{i}"), &format!("BL{}", i - 1)))
                .unwrap();
        }
    }

    #[test]
    fn push_normal_chain() {
        let mut tracker = BlockTracker::new(10);
        chain(&mut tracker, 100, 102);
        assert_eq!(tracker.head().unwrap().height, 102);
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.get(101).unwrap().hash, "BL101");
    }

    #[test]
    fn push_detects_fork() {
        let mut tracker = BlockTracker::new(10);
        chain(&mut tracker, 100, 102);
        // parent is 100, so 101 and 102 are stale
        assert_eq!(tracker.push(block(102, "BLx", "BL100")), Err(2));
        // parent unknown to the window
        assert_eq!(tracker.push(block(103, "BLy", "BLzz")), Err(3));
    }

    #[test]
    fn rewind_to() {
        let mut tracker = BlockTracker::new(20);
        chain(&mut tracker, 100, 110);
        tracker.rewind_to(105);
        assert_eq!(tracker.head().unwrap().height, 105);
        tracker.push(block(106, "BL106b", "BL105")).unwrap();
        assert_eq!(tracker.head().unwrap().hash, "BL106b");
    }

    #[test]
    fn window_size_enforced() {
        let mut tracker = BlockTracker::new(5);
        chain(&mut tracker, 0, 9);
        assert_eq!(tracker.len(), 5);
        assert!(tracker.get(4).is_none());
    }
}
