//! Protocol error taxonomy and its mapping to response statuses.

use http::StatusCode;
use stowage_storage::StorageError;

/// Errors surfaced to the client as structured responses.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed or missing header, wrong content type, vetoed request.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Unknown id, or an expired incomplete upload.
    #[error("upload not found")]
    NotFound,

    #[error("upload is currently locked by another request")]
    Locked,

    #[error("offset mismatch: expected {expected}, got {provided}")]
    OffsetMismatch { expected: u64, provided: u64 },

    #[error("upload is already complete")]
    AlreadyComplete,

    #[error("upload exceeds the maximum allowed size of {max}")]
    SizeExceeded { max: u64 },

    #[error("checksum mismatch; the chunk was discarded")]
    ChecksumMismatch,

    #[error("the store does not support the {0} extension")]
    UnsupportedExtension(&'static str),

    #[error("storage error: {0}")]
    Store(StorageError),
}

impl ProtocolError {
    /// Error code for logs and programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::NotFound => "not_found",
            Self::Locked => "locked",
            Self::OffsetMismatch { .. } => "offset_mismatch",
            Self::AlreadyComplete => "already_complete",
            Self::SizeExceeded { .. } => "size_exceeded",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::UnsupportedExtension(_) => "unsupported_extension",
            Self::Store(_) => "store_failure",
        }
    }

    /// Response status. The checksum-mismatch status is configurable and
    /// passed in by the engine; it is only guaranteed distinct from 400.
    pub fn status_code(&self, checksum_mismatch_status: StatusCode) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedVersion(_) => StatusCode::PRECONDITION_FAILED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Locked => StatusCode::CONFLICT,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::AlreadyComplete => StatusCode::BAD_REQUEST,
            Self::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChecksumMismatch => checksum_mismatch_status,
            Self::UnsupportedExtension(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<StorageError> for ProtocolError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::NotFound,
            StorageError::SizeExceeded { declared } => Self::SizeExceeded { max: declared },
            StorageError::LengthAlreadySet(_) => {
                Self::InvalidRequest("upload length was already set".to_string())
            }
            StorageError::Unsupported(extension) => Self::UnsupportedExtension(extension),
            other => Self::Store(other),
        }
    }
}

impl From<stowage_core::Error> for ProtocolError {
    fn from(err: stowage_core::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let mismatch = StatusCode::from_u16(460).unwrap();
        assert_eq!(
            ProtocolError::UnsupportedVersion("0.2.2".into()).status_code(mismatch),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ProtocolError::Locked.status_code(mismatch),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ProtocolError::ChecksumMismatch.status_code(mismatch).as_u16(),
            460
        );
        assert_eq!(
            ProtocolError::SizeExceeded { max: 1 }.status_code(mismatch),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn storage_errors_map_to_protocol_errors() {
        assert!(matches!(
            ProtocolError::from(StorageError::NotFound("x".into())),
            ProtocolError::NotFound
        ));
        assert!(matches!(
            ProtocolError::from(StorageError::SizeExceeded { declared: 9 }),
            ProtocolError::SizeExceeded { max: 9 }
        ));
        assert!(matches!(
            ProtocolError::from(StorageError::Unsupported("concatenation")),
            ProtocolError::UnsupportedExtension("concatenation")
        ));
    }
}
