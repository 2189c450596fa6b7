//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while crawling and indexing.
///
/// Fork handling is not represented here: a diverging chain is an expected
/// crawler state, not a failure.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Upstream node unreachable, timed out or returned a transient failure.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed or unsupported operation payload.
    #[error("Decode error at block {height}: {reason}")]
    Decode { height: i64, reason: String },

    /// Flow conservation mismatch, missing account and similar ledger bugs.
    #[error("Invariant violated at block {height}: {reason}")]
    Invariant { height: i64, reason: String },

    #[error("Index error in '{index}': {reason}")]
    Index { index: String, reason: String },

    /// Recoverable lookup miss (unknown block, cycle, proposal, ...).
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("Chain id mismatch: stored {expected}, node reports {actual}")]
    ChainMismatch { expected: String, actual: String },

    #[error("Rollback from {height} exceeds max depth {max_depth}")]
    RollbackTooDeep { height: i64, max_depth: i64 },

    #[error("Crawler aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn index(index: impl Into<String>, reason: impl ToString) -> Self {
        Self::Index {
            index: index.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for transient node errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` for a typed lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the crawler must halt instead of continuing.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !self.is_not_found()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IndexerError::Rpc("timeout".into()).is_transient());
        assert!(!IndexerError::Rpc("timeout".into()).is_fatal());

        let nf = IndexerError::not_found("proposal", 7);
        assert!(nf.is_not_found());
        assert!(!nf.is_fatal());
        assert_eq!(nf.to_string(), "proposal not found: 7");

        let inv = IndexerError::Invariant {
            height: 10,
            reason: "flow mismatch".into(),
        };
        assert!(inv.is_fatal());
        assert!(IndexerError::Decode { height: 1, reason: "x".into() }.is_fatal());
    }
}
