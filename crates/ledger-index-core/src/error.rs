//! Error types for the ledger indexer
//!
//! Variants follow the failure categories the indexer distinguishes:
//! transport, protocol, storage, publish. Those are absorbed and retried on a
//! later cycle; anything else that escapes the engine is fatal.

use thiserror::Error;

/// Result type alias for indexer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ledger indexer
#[derive(Error, Debug)]
pub enum Error {
    /// Connection refused, dropped, or a frame could not be written
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unsuccessful ledger response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Snapshot files, pin state, or records directory problems
    #[error("Storage error: {0}")]
    Storage(String),

    /// Content store upload, name publication, or pin management failures
    #[error("Publish error ({store}): {message}")]
    Publish {
        /// Content store name
        store: String,
        /// Error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested object does not exist (e.g. unpinning something not pinned)
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a content-store error
    pub fn publish(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error is one the indexer absorbs (logs and moves on)
    /// rather than one that should stop the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Protocol(_)
                | Self::Storage(_)
                | Self::Io(_)
                | Self::Publish { .. }
                | Self::NotFound(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
