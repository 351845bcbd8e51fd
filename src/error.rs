//! Error types for xorcas

use thiserror::Error;

/// Result type alias for xorcas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in xorcas operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Digest corruption under prefix {prefix}: stored {stored}, computed {computed}")]
    Corruption {
        prefix: String,
        stored: String,
        computed: String,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// True for faults that mean the request itself was malformed
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidHash(_) | Error::HashMismatch { .. })
    }
}
