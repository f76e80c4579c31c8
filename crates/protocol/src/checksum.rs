//! Checksum verification and chunk rollback.
//!
//! Runs after an append (including one ended by a disconnect) and decides the
//! fate of the bytes from chunk-start to the current offset: keep them, or
//! truncate back to chunk-start. Earlier, already-committed data is never
//! touched.

use crate::error::ProtocolResult;
use crate::validation::ChecksumDeclaration;
use stowage_core::{UploadChecksum, UploadId};
use stowage_storage::{AppendResult, UploadStore};

/// Fate of the most recent chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkVerdict {
    /// No checksum applied; the data stays.
    NotApplicable,
    /// The digest matched; the data stays.
    Verified,
    /// The digest did not match (or a declared trailing checksum never
    /// arrived); the chunk was truncated away.
    Rejected,
}

/// Verify the chunk written by `append` and roll it back on mismatch.
///
/// A declared trailing checksum that never arrived (the client disconnected
/// before the trailers) is replaced by a fallback sentinel that never
/// matches, so the unverified tail is discarded while earlier chunks stay.
pub(crate) async fn verify_chunk(
    store: &dyn UploadStore,
    id: UploadId,
    declaration: ChecksumDeclaration,
    trailer_value: Option<String>,
    append: &AppendResult,
) -> ProtocolResult<ChunkVerdict> {
    let declared = match declaration {
        ChecksumDeclaration::None => return Ok(ChunkVerdict::NotApplicable),
        ChecksumDeclaration::Leading(checksum) => Some(checksum),
        ChecksumDeclaration::Trailing => match trailer_value {
            Some(raw) => UploadChecksum::parse(&raw).ok(),
            None => None,
        },
    };

    let start = store.chunk_start(id).await?.unwrap_or(0);
    let end = start + append.bytes_written;

    let matched = match &declared {
        Some(checksum) => {
            let digest = store
                .digest_range(id, checksum.algorithm, start, end)
                .await?;
            digest == checksum.digest
        }
        // Sentinel path: the declared trailer never arrived.
        None => false,
    };

    if matched {
        if append.is_clean() {
            store.mark_chunk_complete(id).await?;
        }
        Ok(ChunkVerdict::Verified)
    } else {
        store.truncate(id, start).await?;
        tracing::warn!(%id, start, end, "checksum verification failed; chunk discarded");
        Ok(ChunkVerdict::Rejected)
    }
}
