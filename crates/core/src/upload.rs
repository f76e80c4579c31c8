//! Upload resource types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload resource.
///
/// Opaque on the wire; never reassigned for the lifetime of the resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(e.to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Concatenation role of an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatRole {
    /// An ordinary upload, neither a building block nor an assembled result.
    Standalone,
    /// A building block for a later final concatenation.
    Partial,
    /// The assembled result of ordered partial uploads. Never writable.
    Final { parts: Vec<UploadId> },
}

impl ConcatRole {
    /// Whether writes may target an upload with this role.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Final { .. })
    }

    /// Parse an `Upload-Concat` request header.
    ///
    /// Accepted forms: `partial`, or `final;<url> <url> ...` where each URL's
    /// trailing path segment is an upload id.
    pub fn parse_header(value: &str) -> crate::Result<Self> {
        let value = value.trim();
        if value == "partial" {
            return Ok(Self::Partial);
        }
        let Some(rest) = value.strip_prefix("final;") else {
            return Err(crate::Error::InvalidConcat(format!(
                "expected 'partial' or 'final;<urls>', got '{value}'"
            )));
        };
        let mut parts = Vec::new();
        for url in rest.split_whitespace() {
            let segment = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
            parts.push(UploadId::parse(segment)?);
        }
        if parts.is_empty() {
            return Err(crate::Error::InvalidConcat(
                "final concatenation references no partial uploads".to_string(),
            ));
        }
        Ok(Self::Final { parts })
    }

    /// Encode as an `Upload-Concat` response header value.
    ///
    /// Returns `None` for standalone uploads, which carry no concat header.
    pub fn to_header(&self, base_path: &str) -> Option<String> {
        match self {
            Self::Standalone => None,
            Self::Partial => Some("partial".to_string()),
            Self::Final { parts } => {
                let urls: Vec<String> = parts
                    .iter()
                    .map(|id| format!("{}/{}", base_path.trim_end_matches('/'), id))
                    .collect();
                Some(format!("final;{}", urls.join(" ")))
            }
        }
    }

    /// Encode for sidecar persistence (ids only, no URLs).
    pub fn to_record(&self) -> String {
        match self {
            Self::Standalone => "standalone".to_string(),
            Self::Partial => "partial".to_string(),
            Self::Final { parts } => {
                let ids: Vec<String> = parts.iter().map(UploadId::to_string).collect();
                format!("final;{}", ids.join(" "))
            }
        }
    }

    /// Decode a sidecar record produced by [`to_record`](Self::to_record).
    pub fn from_record(record: &str) -> crate::Result<Self> {
        match record.trim() {
            "standalone" => Ok(Self::Standalone),
            "partial" => Ok(Self::Partial),
            other => {
                let rest = other.strip_prefix("final;").ok_or_else(|| {
                    crate::Error::InvalidConcat(format!("unknown concat record '{other}'"))
                })?;
                let parts = rest
                    .split_whitespace()
                    .map(UploadId::parse)
                    .collect::<crate::Result<Vec<_>>>()?;
                Ok(Self::Final { parts })
            }
        }
    }
}

/// Point-in-time view of one upload resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    /// Unique resource identifier.
    pub id: UploadId,
    /// Declared total length; `None` while length resolution is deferred.
    pub length: Option<u64>,
    /// Bytes durably stored so far.
    pub offset: u64,
    /// Raw `Upload-Metadata` header as supplied at creation, if any.
    /// Values are opaque to the engine.
    pub metadata: Option<String>,
    /// Concatenation role.
    pub concat: ConcatRole,
    /// When the upload expires, if an expiration policy applies.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl FileInfo {
    /// An upload is complete once its length is known and fully written.
    pub fn is_complete(&self) -> bool {
        self.length.is_some_and(|len| self.offset >= len)
    }

    /// Expired uploads are only those that are incomplete past their
    /// expiration timestamp; completed uploads never expire.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        !self.is_complete() && self.expires_at.is_some_and(|at| at <= now)
    }
}
