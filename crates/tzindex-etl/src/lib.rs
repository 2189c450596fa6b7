//! tzindex-etl: turns decoded blocks into ledger rows.
//!
//! ```text
//! codec::Block ──► Builder ──► BlockBuilder ──► index modules
//!                    │  ├── ParamsRegistry   (cycle math per protocol)
//!                    │  ├── OffsetPolicy     (delegation offsets of costs)
//!                    │  ├── ProposalCache / ConstantCache
//!                    │  └── Ledger           (per-group flow conservation)
//!                    └── LedgerStore         (committed state, read only)
//! ```

pub mod builder;
pub mod cache;
pub mod conservation;
pub mod error;
pub mod model;
pub mod params;
pub mod policy;
pub mod store;

pub use builder::{BlockBuilder, Builder};
pub use cache::{CacheStats, ConstantCache, ProposalCache};
pub use error::BuildError;
pub use params::{Params, ParamsRegistry};
pub use policy::{OffsetAmount, OffsetPolicy, OffsetRule, OffsetTrigger};
pub use store::LedgerStore;

/// Deferred task asking the crawler for a contract's script.
pub const SCRIPT_TASK: &str = "script";
