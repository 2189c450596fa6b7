//! Errors raised while building or rolling back a block.

use thiserror::Error;
use tzindex_codec::DecodeError;
use tzindex_core::IndexerError;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Flow conservation mismatch or an impossible ledger state.
    #[error("invariant violated at block {height}: {reason}")]
    Invariant { height: i64, reason: String },

    /// An operation names an address the builder never resolved.
    #[error("missing account {address} at block {height}")]
    MissingAccount { height: i64, address: String },

    #[error("decode failed at block {height}: {source}")]
    Decode {
        height: i64,
        #[source]
        source: DecodeError,
    },

    /// No protocol parameters cover the height.
    #[error("no protocol parameters for height {height}")]
    NoParams { height: i64 },

    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error(transparent)]
    Store(#[from] IndexerError),
}

impl BuildError {
    pub fn invariant(height: i64, reason: impl Into<String>) -> Self {
        Self::Invariant {
            height,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<BuildError> for IndexerError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Invariant { height, reason } => IndexerError::Invariant { height, reason },
            BuildError::MissingAccount { height, address } => IndexerError::Invariant {
                height,
                reason: format!("missing account {address}"),
            },
            BuildError::Decode { height, source } => IndexerError::Decode {
                height,
                reason: source.to_string(),
            },
            BuildError::NoParams { height } => IndexerError::Invariant {
                height,
                reason: "no protocol parameters".into(),
            },
            BuildError::NotFound { entity, key } => IndexerError::NotFound { entity, key },
            BuildError::Store(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_into_indexer_taxonomy() {
        let e: IndexerError = BuildError::invariant(7, "flow mismatch").into();
        assert!(matches!(e, IndexerError::Invariant { height: 7, .. }));
        assert!(e.is_fatal());

        let e: IndexerError = BuildError::Decode {
            height: 9,
            source: DecodeError::MissingConstant { hash: "expr".into() },
        }
        .into();
        assert!(matches!(e, IndexerError::Decode { height: 9, .. }));

        let nf = BuildError::not_found("block", 12);
        assert!(nf.is_not_found());
        assert!(IndexerError::from(nf).is_not_found());
    }
}
