//! Crawl cursor: tracks the next height to fetch and how far the crawler
//! stays behind the node's head.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    /// Last committed height.
    pub height: i64,
    /// Last committed hash.
    pub hash: String,
    /// Number of blocks to stay behind the node head.
    pub delay: i64,
}

impl Cursor {
    pub fn new(height: i64, hash: impl Into<String>, delay: i64) -> Self {
        Self {
            height,
            hash: hash.into(),
            delay,
        }
    }

    pub fn advance(&mut self, height: i64, hash: impl Into<String>) {
        self.height = height;
        self.hash = hash.into();
    }

    /// Returns `true` if `target` is at least `delay` blocks below `head`.
    pub fn is_ready(&self, target: i64, head: i64) -> bool {
        head - target >= self.delay
    }

    pub fn next_height(&self) -> i64 {
        self.height + 1
    }

    /// Highest height that may be fetched while `head` is the node's head.
    pub fn target(&self, head: i64) -> i64 {
        head - self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advance() {
        let mut cursor = Cursor::new(100, "BLa", 0);
        cursor.advance(101, "BLb");
        assert_eq!(cursor.height, 101);
        assert_eq!(cursor.hash, "BLb");
        assert_eq!(cursor.next_height(), 102);
    }

    #[test]
    fn cursor_delay() {
        let cursor = Cursor::new(100, "BLa", 2);
        assert!(cursor.is_ready(100, 102));
        assert!(!cursor.is_ready(101, 102));
        assert_eq!(cursor.target(110), 108);
    }
}
