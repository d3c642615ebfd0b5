//! Error types for Namegraph.

use namegraph_chain::ChainError;
use namegraph_core::{CoreError, Namehash};
use namegraph_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Namegraph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Malformed hex, key or commit bytes.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Chain RPC or log decoding error.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// A zone is missing its endpoint or contract.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A register event named a parent domain that was never registered.
    #[error("parent domain not found: {0}")]
    ParentNotFound(Namehash),

    /// A commit failed signature validation.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// The actor behind a handle is gone.
    #[error("actor stopped: {0}")]
    ActorStopped(String),

    /// Content gateway failure.
    #[error("content error: {0}")]
    Content(String),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// Whether the caller's input was at fault rather than a dependency.
    pub fn is_client_error(&self) -> bool {
        match self {
            GraphError::Core(e) => e.is_format_error(),
            GraphError::Chain(ChainError::MalformedLog(_) | ChainError::UnknownEvent { .. }) => {
                true
            }
            GraphError::InvalidCommit(_) => true,
            _ => false,
        }
    }
}

/// Result type for Namegraph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
