//! Snapshot hook, run best-effort after a block commits.

use std::path::Path;

use async_trait::async_trait;
use tzindex_core::IndexerError;

/// Writes a full copy of committed state for fast resync.
///
/// Failures are logged by the crawler and never stop indexing.
#[async_trait]
pub trait SnapshotHook: Send + Sync {
    async fn snapshot(&self, height: i64, dir: &Path) -> Result<(), IndexerError>;
}
