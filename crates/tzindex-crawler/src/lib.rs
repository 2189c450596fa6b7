//! tzindex-crawler: follows a node's chain and feeds every block through
//! the builder into the index registry.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tzindex_core::IndexRegistry;
//! use tzindex_crawler::{Crawler, CrawlerBuilder};
//! use tzindex_rpc::{HttpClient, Node};
//! use tzindex_storage::{standard_indexes, MemoryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = Arc::new(Node::new(Arc::new(HttpClient::with_defaults("http://localhost:8732")?)));
//! let store = Arc::new(MemoryStore::new());
//! let mut registry = IndexRegistry::new("", store.clone()).with_tx(store.clone());
//! for index in standard_indexes(&store) {
//!     registry.register(index)?;
//! }
//!
//! let config = CrawlerBuilder::new().queue(32).stop_block(1_000).build_config();
//! let mut crawler = Crawler::new(config, node, store, registry);
//! crawler.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod crawler;
pub mod event;
pub mod fetcher;
pub mod snapshot;
pub mod tasks;

pub use builder::CrawlerBuilder;
pub use config::{CrawlerConfig, SnapshotConfig};
pub use crawler::{Crawler, LedgerRegistry};
pub use event::CrawlerEvent;
pub use fetcher::Fetcher;
pub use snapshot::SnapshotHook;
