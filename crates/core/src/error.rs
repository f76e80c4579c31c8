//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid metadata header: {0}")]
    InvalidMetadata(String),

    #[error("invalid checksum header: {0}")]
    InvalidChecksum(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid concat header: {0}")]
    InvalidConcat(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
