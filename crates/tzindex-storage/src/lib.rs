//! tzindex-storage: table engine and index modules for tzindex.
//!
//! Backends:
//! - [`memory`]: in-memory ledger tables with staged block transactions
//! - [`sqlite`]: chain tips and block hashes via `sqlx` (feature `sqlite`)
//!
//! The [`index`] modules project each built block into the tables and are
//! registered with the core `IndexRegistry` in the order returned by
//! [`index::standard_indexes`].

pub mod index;
pub mod memory;
pub mod tables;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use index::{standard_indexes, LedgerIndex};
pub use memory::{MemoryStore, StoreStats};
pub use tables::{FlowSummary, Tables, VoteTally};
