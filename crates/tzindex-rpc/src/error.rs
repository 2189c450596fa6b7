//! Transport-level error types.

use thiserror::Error;
use tzindex_codec::DecodeError;

/// Errors raised while talking to the node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status other than 404.
    #[error("HTTP {status} from {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    /// 404: the node does not know the requested object.
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Circuit breaker open for node: {url}")]
    CircuitOpen { url: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response body is not the JSON shape we expect.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Receipt payload failed typed decoding.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` for transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout_ms: u64) -> Self {
        if e.is_timeout() {
            Self::Timeout { ms: timeout_ms }
        } else {
            Self::Http(e.to_string())
        }
    }
}
