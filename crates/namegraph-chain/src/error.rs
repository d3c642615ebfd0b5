//! Error types for the chain module.

use thiserror::Error;

use namegraph_core::CoreError;

/// Errors that can occur while talking to a chain or decoding its logs.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The request never produced a usable HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response was not the shape the method promises.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A log carried a topic this decoder does not know.
    #[error("unknown event topic: {topic}")]
    UnknownEvent { topic: String },

    /// A known log whose payload could not be decoded.
    #[error("malformed log: {0}")]
    MalformedLog(String),

    /// Hex or key material inside a log was invalid.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl ChainError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Rpc { .. })
    }
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
