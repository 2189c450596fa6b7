//! tzindex-core: chain-agnostic foundation of the tzindex ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! Crawler
//!   ├── BlockTracker   (recent block window, parent hash chain)
//!   ├── ReorgDetector  (predecessor mismatch, replaced head, node rewind)
//!   ├── IndexRegistry  (ordered BlockIndexer lifecycle, per-table ChainTip)
//!   │     └── TipStore (memory / SQLite)
//!   └── TaskScheduler  (deferred work requested by index modules)
//! ```

pub mod cursor;
pub mod error;
pub mod registry;
pub mod reorg;
pub mod state;
pub mod task;
pub mod tip;
pub mod tracker;
pub mod types;

pub use cursor::Cursor;
pub use error::IndexerError;
pub use registry::{BlockIndexer, BlockTx, IndexOptions, IndexRegistry};
pub use reorg::{ReorgDetector, ReorgEvent, ReorgType};
pub use state::CrawlerState;
pub use task::{Task, TaskQueue, TaskResult, TaskScheduler};
pub use tip::{MemoryTipStore, TipStore};
pub use tracker::BlockTracker;
pub use types::{BlockSummary, ChainBlock, ChainTip};
