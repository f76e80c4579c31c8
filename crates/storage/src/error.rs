//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("upload already exists: {0}")]
    AlreadyExists(String),

    #[error("append would exceed declared length {declared}")]
    SizeExceeded { declared: u64 },

    #[error("upload length was already set: {0}")]
    LengthAlreadySet(String),

    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("corrupt sidecar record: {0}")]
    InvalidRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
