//! Error types for datastore operations

use thiserror::Error;

/// Main error type for versioned block store operations
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// I/O failure in the underlying block store
    #[error("storage fault: {0}")]
    StorageFault(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Batch write input ended before every addressed block was consumed
    #[error("truncated input: {0}")]
    Truncated(String),

    /// Write attempted against a read-only chained view
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Call against a session that has already stopped
    #[error("session gone: {0}")]
    Gone(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for datastore operations
pub type Result<T> = std::result::Result<T, DatastoreError>;

impl From<serde_json::Error> for DatastoreError {
    fn from(err: serde_json::Error) -> Self {
        DatastoreError::Serialization(err.to_string())
    }
}
