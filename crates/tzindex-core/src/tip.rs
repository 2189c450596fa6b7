//! Per-table chain tips: the persisted record of how far each table got.
//!
//! On restart the crawler resumes from the lowest tip across all tables so
//! no table is skipped ahead of its real progress.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::ChainTip;

/// Durable storage for [`ChainTip`] records, one per table.
///
/// Implementations include `MemoryTipStore` and the SQLite store in
/// `tzindex-storage`.
#[async_trait]
pub trait TipStore: Send + Sync {
    async fn load(&self, table: &str) -> Result<Option<ChainTip>, IndexerError>;

    async fn load_all(&self) -> Result<HashMap<String, ChainTip>, IndexerError>;

    /// Save (upsert) the tip of one table.
    async fn save(&self, table: &str, tip: &ChainTip) -> Result<(), IndexerError>;

    async fn delete(&self, table: &str) -> Result<(), IndexerError>;
}

/// Lowest tip among `tips`, the height the crawler can safely resume from.
pub fn min_tip<'a>(tips: impl IntoIterator<Item = &'a ChainTip>) -> Option<&'a ChainTip> {
    tips.into_iter().min_by_key(|t| t.best_height)
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTipStore {
    data: Mutex<HashMap<String, ChainTip>>,
}

impl MemoryTipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TipStore for MemoryTipStore {
    async fn load(&self, table: &str) -> Result<Option<ChainTip>, IndexerError> {
        Ok(self.data.lock().unwrap().get(table).cloned())
    }

    async fn load_all(&self) -> Result<HashMap<String, ChainTip>, IndexerError> {
        Ok(self.data.lock().unwrap().clone())
    }

    async fn save(&self, table: &str, tip: &ChainTip) -> Result<(), IndexerError> {
        self.data.lock().unwrap().insert(table.to_string(), tip.clone());
        Ok(())
    }

    async fn delete(&self, table: &str) -> Result<(), IndexerError> {
        self.data.lock().unwrap().remove(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockSummary;
    use chrono::DateTime;

    fn tip(height: i64) -> ChainTip {
        ChainTip::new(
            "NetXdQprcVkpaWU",
            &BlockSummary {
                height,
                hash: format!("BL{height}"),
                parent_hash: format!("BL{}", height - 1),
                timestamp: DateTime::from_timestamp(height * 30, 0).unwrap(),
                cycle: 0,
            },
        )
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryTipStore::new();
        assert!(store.load("account").await.unwrap().is_none());

        store.save("account", &tip(1000)).await.unwrap();
        let t = store.load("account").await.unwrap().unwrap();
        assert_eq!(t.best_height, 1000);
        assert_eq!(t.best_hash, "BL1000");

        store.delete("account").await.unwrap();
        assert!(store.load("account").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_from_lowest_tip() {
        let store = MemoryTipStore::new();
        store.save("block", &tip(12)).await.unwrap();
        store.save("account", &tip(10)).await.unwrap();
        store.save("flow", &tip(11)).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(min_tip(all.values()).unwrap().best_height, 10);
        assert!(min_tip(std::iter::empty()).is_none());
    }
}
