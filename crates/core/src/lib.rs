//! Core domain types and shared logic for the stowage upload engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers and per-upload state
//! - Concatenation roles (standalone, partial, final)
//! - Metadata and checksum header codecs
//! - Protocol header names and values
//! - Engine configuration

pub mod checksum;
pub mod config;
pub mod error;
pub mod headers;
pub mod metadata;
pub mod upload;

pub use checksum::{ChecksumAlgorithm, ChecksumHasher, UploadChecksum};
pub use config::{ExpirationConfig, ExpirationPolicy, ProtocolConfig};
pub use error::{Error, Result};
pub use metadata::UploadMetadata;
pub use upload::{ConcatRole, FileInfo, UploadId};

/// Protocol version spoken and advertised by the engine.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Content type required on write requests.
pub const OFFSET_STREAM_CONTENT_TYPE: &str = "application/offset+octet-stream";
