//! Error types for Namegraph Core.

use thiserror::Error;

/// Core errors raised while decoding or verifying identity material.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing signature")]
    MissingSignature,

    #[error("malformed commit: {0}")]
    MalformedCommit(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    #[error("channel key derivation failed at label {0:?}")]
    DerivationFailed(String),
}

impl CoreError {
    /// Whether the error describes malformed input rather than a failed check.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidHex(_)
                | CoreError::MalformedCommit(_)
                | CoreError::DecodingError(_)
                | CoreError::InvalidPointer(_)
                | CoreError::InvalidPublicKey
        )
    }
}
