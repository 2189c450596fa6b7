//! tzindex-codec: decoding of node block receipts into a closed, typed model.
//!
//! Operations are dispatched on their `kind` discriminator before any other
//! field is read. Every variant exposes its fees, its result envelope and the
//! addresses it references, including addresses packed inside Micheline
//! parameters, storage, bigmap updates and ticket updates.

pub mod address;
pub mod balance;
pub mod bigmap;
pub mod block;
pub mod embedded;
pub mod error;
pub mod kind;
pub mod micheline;
pub mod operation;
pub mod result;
pub mod ticket;
pub mod util;

pub use address::{Address, AddressSet, AddressType};
pub use balance::{BalanceKind, BalanceUpdate};
pub use bigmap::{BigmapEvent, DiffAction};
pub use block::{Block, Header, LevelInfo, Metadata, OpRef, OperationGroup};
pub use error::DecodeError;
pub use kind::OpKind;
pub use micheline::{Features, OpCode, Prim, Script};
pub use operation::Operation;
pub use result::{ImplicitResult, InternalResult, OpStatus, OperationResult};
pub use ticket::{TicketToken, TicketUpdate};
