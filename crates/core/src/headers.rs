//! Protocol header names.
//!
//! All names are lowercase so they can be used directly against an
//! [`http::HeaderMap`], which stores keys case-insensitively.

/// Version header; required on every request except OPTIONS.
pub const TUS_RESUMABLE: &str = "tus-resumable";

/// Comma-separated list of protocol versions the server speaks.
pub const TUS_VERSION: &str = "tus-version";

/// Comma-separated list of supported extensions.
pub const TUS_EXTENSION: &str = "tus-extension";

/// Maximum upload size in bytes the server accepts.
pub const TUS_MAX_SIZE: &str = "tus-max-size";

/// Comma-separated list of supported checksum algorithms.
pub const TUS_CHECKSUM_ALGORITHM: &str = "tus-checksum-algorithm";

pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";
pub const UPLOAD_METADATA: &str = "upload-metadata";
pub const UPLOAD_CHECKSUM: &str = "upload-checksum";
pub const UPLOAD_CONCAT: &str = "upload-concat";
pub const UPLOAD_EXPIRES: &str = "upload-expires";

/// Method tunnelling for clients that cannot emit PATCH or DELETE.
pub const METHOD_OVERRIDE: &str = "x-http-method-override";

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CACHE_CONTROL: &str = "cache-control";
pub const LOCATION: &str = "location";
