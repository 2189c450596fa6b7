//! Error types for receipt decoding.

use thiserror::Error;

/// Errors raised while decoding node receipts. All of them are fatal for the
/// block that contains the offending payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported operation kind '{kind}'")]
    UnsupportedKind { kind: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid {kind} operation: {reason}")]
    InvalidOperation { kind: String, reason: String },

    #[error("Invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("Invalid Micheline: {reason}")]
    InvalidMicheline { reason: String },

    #[error("Unknown global constant {hash}")]
    MissingConstant { hash: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DecodeError {
    pub(crate) fn micheline(reason: impl Into<String>) -> Self {
        Self::InvalidMicheline {
            reason: reason.into(),
        }
    }
}
