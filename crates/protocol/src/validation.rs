//! Ordered, fail-fast validation pipeline.
//!
//! Each intent has its own ordered checks; the first failure aborts the
//! exchange with a structured error before any mutation. Checks that need
//! store state run after the per-upload lock is held.

use crate::error::{ProtocolError, ProtocolResult};
use crate::request::Request;
use stowage_core::{
    ConcatRole, FileInfo, OFFSET_STREAM_CONTENT_TYPE, PROTOCOL_VERSION, ProtocolConfig,
    UploadChecksum, UploadId, UploadMetadata, headers,
};
use stowage_storage::{StoreCapabilities, UploadStore};
use time::OffsetDateTime;

/// Version header must equal the supported value (all intents but OPTIONS).
pub(crate) fn require_version(request: &Request) -> ProtocolResult<()> {
    match request.header(headers::TUS_RESUMABLE) {
        Some(version) if version.trim() == PROTOCOL_VERSION => Ok(()),
        Some(version) => Err(ProtocolError::UnsupportedVersion(version.to_string())),
        // The resolver never dispatches without the header; treat a missing
        // one like an unsupported version anyway.
        None => Err(ProtocolError::UnsupportedVersion("<missing>".to_string())),
    }
}

/// Validated inputs for a create (or create-partial) operation.
#[derive(Debug)]
pub(crate) struct CreatePlan {
    /// `None` means length resolution is deferred.
    pub length: Option<u64>,
    /// Raw metadata header, already validated.
    pub metadata: Option<String>,
}

/// How the write declared its checksum, if at all.
#[derive(Debug)]
pub(crate) enum ChecksumDeclaration {
    None,
    Leading(UploadChecksum),
    /// Announced via the `Trailer` header; the value arrives after the body.
    Trailing,
}

/// Validated inputs for a write operation.
#[derive(Debug)]
pub(crate) struct WritePlan {
    /// Deferred length resolved by this request, to set before appending.
    pub new_length: Option<u64>,
    pub checksum: ChecksumDeclaration,
}

fn validated_metadata(request: &Request) -> ProtocolResult<Option<String>> {
    match request.header(headers::UPLOAD_METADATA) {
        Some(raw) => {
            UploadMetadata::parse(raw)?;
            Ok(Some(raw.to_string()))
        }
        None => Ok(None),
    }
}

fn check_max_size(length: u64, config: &ProtocolConfig) -> ProtocolResult<()> {
    if let Some(max) = config.max_size {
        if length > max {
            return Err(ProtocolError::SizeExceeded { max });
        }
    }
    Ok(())
}

fn parse_header_u64(name: &str, raw: &str) -> ProtocolResult<u64> {
    // u64 parsing rejects negatives; reject a leading '+' too.
    let value = raw.trim();
    if value.starts_with('+') {
        return Err(ProtocolError::InvalidRequest(format!(
            "invalid {name} '{raw}'"
        )));
    }
    value
        .parse::<u64>()
        .map_err(|e| ProtocolError::InvalidRequest(format!("invalid {name} '{raw}': {e}")))
}

/// CreateFile checks: exactly one of declared length or defer-length flag,
/// length within bounds, metadata well-formed.
pub(crate) fn validate_create(
    request: &Request,
    capabilities: &StoreCapabilities,
    config: &ProtocolConfig,
) -> ProtocolResult<CreatePlan> {
    let length = match (
        request.header(headers::UPLOAD_LENGTH),
        request.header(headers::UPLOAD_DEFER_LENGTH),
    ) {
        (Some(_), Some(_)) => {
            return Err(ProtocolError::InvalidRequest(
                "upload-length and upload-defer-length are mutually exclusive".to_string(),
            ));
        }
        (None, None) => {
            return Err(ProtocolError::InvalidRequest(
                "either upload-length or upload-defer-length is required".to_string(),
            ));
        }
        (Some(raw), None) => {
            let length = parse_header_u64(headers::UPLOAD_LENGTH, raw)?;
            check_max_size(length, config)?;
            Some(length)
        }
        (None, Some(flag)) => {
            if flag.trim() != "1" {
                return Err(ProtocolError::InvalidRequest(format!(
                    "upload-defer-length must be '1', got '{flag}'"
                )));
            }
            if !capabilities.creation_defer_length {
                return Err(ProtocolError::UnsupportedExtension("creation-defer-length"));
            }
            None
        }
    };
    let metadata = validated_metadata(request)?;
    Ok(CreatePlan { length, metadata })
}

pub(crate) fn checksum_declaration(
    request: &Request,
    capabilities: &StoreCapabilities,
    store: &dyn UploadStore,
) -> ProtocolResult<ChecksumDeclaration> {
    let trailer_declared = request
        .header("trailer")
        .is_some_and(|v| v.to_ascii_lowercase().contains(headers::UPLOAD_CHECKSUM));
    if trailer_declared {
        if !capabilities.checksum_trailer {
            return Err(ProtocolError::UnsupportedExtension("checksum-trailer"));
        }
        return Ok(ChecksumDeclaration::Trailing);
    }
    match request.header(headers::UPLOAD_CHECKSUM) {
        Some(raw) => {
            if !capabilities.checksum {
                return Err(ProtocolError::UnsupportedExtension("checksum"));
            }
            let checksum = UploadChecksum::parse(raw)?;
            if !store.checksum_algorithms().contains(&checksum.algorithm) {
                return Err(ProtocolError::InvalidRequest(format!(
                    "checksum algorithm {} is not supported by this store",
                    checksum.algorithm
                )));
            }
            Ok(ChecksumDeclaration::Leading(checksum))
        }
        None => Ok(ChecksumDeclaration::None),
    }
}

/// WriteFile checks, in pipeline order: content type, offset header, resource
/// exists and is unexpired, resource is writable, offsets agree, resource not
/// already complete, deferred-length handling, checksum declaration.
///
/// Runs with the per-upload lock held.
pub(crate) async fn validate_write(
    request: &Request,
    info: &FileInfo,
    store: &dyn UploadStore,
    capabilities: &StoreCapabilities,
    config: &ProtocolConfig,
    now: OffsetDateTime,
) -> ProtocolResult<WritePlan> {
    match request.header(headers::CONTENT_TYPE) {
        Some(value) if value.trim().eq_ignore_ascii_case(OFFSET_STREAM_CONTENT_TYPE) => {}
        other => {
            return Err(ProtocolError::InvalidRequest(format!(
                "content-type must be {OFFSET_STREAM_CONTENT_TYPE}, got '{}'",
                other.unwrap_or("<none>")
            )));
        }
    }

    let provided_offset = match request.header(headers::UPLOAD_OFFSET) {
        Some(raw) => parse_header_u64(headers::UPLOAD_OFFSET, raw)?,
        None => {
            return Err(ProtocolError::InvalidRequest(
                "upload-offset header is required".to_string(),
            ));
        }
    };

    if info.is_expired(now) {
        return Err(ProtocolError::NotFound);
    }

    if !info.concat.is_writable() {
        return Err(ProtocolError::InvalidRequest(
            "a final upload is not writable".to_string(),
        ));
    }

    if provided_offset != info.offset {
        return Err(ProtocolError::OffsetMismatch {
            expected: info.offset,
            provided: provided_offset,
        });
    }

    if info.is_complete() {
        return Err(ProtocolError::AlreadyComplete);
    }

    let new_length = match (info.length, request.header(headers::UPLOAD_LENGTH)) {
        // First write against a deferred-length upload must resolve it.
        (None, Some(raw)) => {
            let length = parse_header_u64(headers::UPLOAD_LENGTH, raw)?;
            check_max_size(length, config)?;
            if length < info.offset {
                return Err(ProtocolError::InvalidRequest(format!(
                    "upload-length {length} is below the current offset {}",
                    info.offset
                )));
            }
            Some(length)
        }
        (None, None) if capabilities.creation_defer_length => {
            return Err(ProtocolError::InvalidRequest(
                "upload-length is required on the first write of a deferred-length upload"
                    .to_string(),
            ));
        }
        (None, None) => {
            // A store without deferred length never creates such uploads;
            // reaching here means a corrupt record rather than a bad request.
            return Err(ProtocolError::InvalidRequest(
                "upload has no declared length".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(ProtocolError::InvalidRequest(
                "upload-length was already set and cannot be sent again".to_string(),
            ));
        }
        (Some(_), None) => None,
    };

    let checksum = checksum_declaration(request, capabilities, store)?;

    Ok(WritePlan {
        new_length,
        checksum,
    })
}

/// Validated inputs for a concatenation operation.
#[derive(Debug)]
pub(crate) enum ConcatPlan {
    /// Create a partial upload; CreateFile handles it from here, including
    /// its own validation.
    Partial,
    /// Assemble a final upload from ordered, complete partials.
    Final {
        parts: Vec<UploadId>,
        metadata: Option<String>,
        total: u64,
    },
}

/// ConcatenateFiles checks: header parses; for final targets every referenced
/// part exists, is partial and is complete, and the combined length stays
/// within bounds. Only the concat request's own metadata header applies.
pub(crate) async fn validate_concat(
    request: &Request,
    store: &dyn UploadStore,
    config: &ProtocolConfig,
) -> ProtocolResult<ConcatPlan> {
    let raw = request.header(headers::UPLOAD_CONCAT).ok_or_else(|| {
        ProtocolError::InvalidRequest("upload-concat header is required".to_string())
    })?;
    match ConcatRole::parse_header(raw)? {
        ConcatRole::Partial => Ok(ConcatPlan::Partial),
        ConcatRole::Final { parts } => {
            let metadata = validated_metadata(request)?;
            let mut total: u64 = 0;
            for part in &parts {
                if !store.exists(*part).await? {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "referenced partial upload {part} does not exist"
                    )));
                }
                let info = store.info(*part).await?;
                if info.concat != ConcatRole::Partial {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "upload {part} is not a partial upload"
                    )));
                }
                if !info.is_complete() {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "partial upload {part} is not complete"
                    )));
                }
                total += info.length.unwrap_or(0);
            }
            check_max_size(total, config)?;
            Ok(ConcatPlan::Final {
                parts,
                metadata,
                total,
            })
        }
        ConcatRole::Standalone => Err(ProtocolError::InvalidRequest(
            "upload-concat must be 'partial' or 'final'".to_string(),
        )),
    }
}
