//! tzindex-rpc: client for the upstream node's REST interface.
//!
//! [`HttpClient`] implements the [`RestTransport`] trait with retry and a
//! circuit breaker; [`Node`] layers the typed [`NodeApi`] on top of any
//! transport so tests can swap in canned responses.

pub mod error;
pub mod http;
pub mod node;
pub mod policy;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpClient, HttpClientConfig};
pub use node::{BlockHeaderInfo, BlockId, Constants, HeadStream, Node, NodeApi, Status, VersionInfo};
pub use policy::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy};
pub use transport::{HealthStatus, JsonStream, RestTransport};
