//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use crate::source::ContentSource;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use stowage_core::{ChecksumAlgorithm, ConcatRole, FileInfo, UploadId};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Flat capability descriptor declared by a store.
///
/// Validation and options-building consume these booleans; nothing in the
/// engine probes store types at runtime.
#[derive(Clone, Copy, Debug)]
pub struct StoreCapabilities {
    pub creation: bool,
    pub creation_with_upload: bool,
    pub creation_defer_length: bool,
    pub termination: bool,
    pub checksum: bool,
    pub checksum_trailer: bool,
    pub concatenation: bool,
    pub expiration: bool,
}

impl StoreCapabilities {
    /// Every extension enabled.
    pub fn full() -> Self {
        Self {
            creation: true,
            creation_with_upload: true,
            creation_defer_length: true,
            termination: true,
            checksum: true,
            checksum_trailer: true,
            concatenation: true,
            expiration: true,
        }
    }

    /// Creation only; every optional extension disabled.
    pub fn minimal() -> Self {
        Self {
            creation: true,
            creation_with_upload: false,
            creation_defer_length: false,
            termination: false,
            checksum: false,
            checksum_trailer: false,
            concatenation: false,
            expiration: false,
        }
    }

    /// Extension names advertised in the `Tus-Extension` header, in the
    /// order the protocol documents them.
    pub fn extension_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.creation {
            names.push("creation");
        }
        if self.creation_with_upload {
            names.push("creation-with-upload");
        }
        if self.creation_defer_length {
            names.push("creation-defer-length");
        }
        if self.termination {
            names.push("termination");
        }
        if self.checksum {
            names.push("checksum");
        }
        if self.checksum_trailer {
            names.push("checksum-trailer");
        }
        if self.concatenation {
            names.push("concatenation");
        }
        if self.expiration {
            names.push("expiration");
        }
        names
    }
}

/// How an append run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendCompletion {
    /// The source was read to the end.
    Finished,
    /// Cancellation was requested; already-durable bytes were kept.
    Cancelled,
    /// The client went away mid-read; already-durable bytes were kept.
    Disconnected,
}

/// Outcome of one append run.
#[derive(Clone, Copy, Debug)]
pub struct AppendResult {
    /// Bytes durably written by this run.
    pub bytes_written: u64,
    pub completion: AppendCompletion,
}

impl AppendResult {
    /// Whether the run read its input to the end without interruption.
    pub fn is_clean(&self) -> bool {
        self.completion == AppendCompletion::Finished
    }
}

/// Durable, resumable byte store plus sidecar state.
///
/// Mandatory operations cover creation, appending, reads of per-upload state
/// and deletion. Extension operations (deferred length, checksums,
/// concatenation, expiration) default to [`StorageError::Unsupported`];
/// stores opt in by overriding them and declaring the matching capability.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Capability descriptor for this store.
    fn capabilities(&self) -> StoreCapabilities;

    /// Checksum algorithms this store can verify, independent of any file.
    fn checksum_algorithms(&self) -> &'static [ChecksumAlgorithm] {
        ChecksumAlgorithm::all()
    }

    /// Allocate an empty upload and its sidecar records. Returns the new id.
    async fn create(
        &self,
        length: Option<u64>,
        metadata: Option<&str>,
        role: ConcatRole,
    ) -> StorageResult<UploadId>;

    async fn exists(&self, id: UploadId) -> StorageResult<bool>;

    /// Bytes durably stored so far.
    async fn offset(&self, id: UploadId) -> StorageResult<u64>;

    /// Declared total length; `None` while deferred.
    async fn length(&self, id: UploadId) -> StorageResult<Option<u64>>;

    /// Raw metadata header recorded at creation.
    async fn metadata(&self, id: UploadId) -> StorageResult<Option<String>>;

    async fn concat_role(&self, id: UploadId) -> StorageResult<ConcatRole>;

    async fn expiration(&self, id: UploadId) -> StorageResult<Option<OffsetDateTime>>;

    /// Assemble the full point-in-time view of one upload.
    async fn info(&self, id: UploadId) -> StorageResult<FileInfo> {
        Ok(FileInfo {
            id,
            length: self.length(id).await?,
            offset: self.offset(id).await?,
            metadata: self.metadata(id).await?,
            concat: self.concat_role(id).await?,
            expires_at: self.expiration(id).await?,
        })
    }

    /// Append bytes from `source` at the current offset.
    ///
    /// Records chunk provenance before reading: the pre-append offset becomes
    /// the chunk start and any prior chunk-complete marker is cleared. Input
    /// is read in bounded chunks through an internal write buffer flushed
    /// only when full or at end of input. Cancellation is honoured at chunk
    /// granularity and is not an error: the run stops cleanly and reports the
    /// durably-written count. Returns [`StorageError::SizeExceeded`] if the
    /// append would grow past the declared length.
    async fn append(
        &self,
        id: UploadId,
        source: &mut dyn ContentSource,
        cancel: &CancellationToken,
    ) -> StorageResult<AppendResult>;

    /// Remove the upload's data and every sidecar.
    async fn delete(&self, id: UploadId) -> StorageResult<()>;

    /// Seekable read-back of stored content, for completed uploads.
    async fn read_back(&self, id: UploadId) -> StorageResult<ByteStream>;

    /// Start offset of the most recent append, if one ever ran.
    async fn chunk_start(&self, id: UploadId) -> StorageResult<Option<u64>>;

    /// Whether the most recent append finished without error.
    async fn is_chunk_complete(&self, id: UploadId) -> StorageResult<bool>;

    async fn mark_chunk_complete(&self, id: UploadId) -> StorageResult<()>;

    /// Discard bytes past `offset`; used to roll back an unverified chunk.
    async fn truncate(&self, id: UploadId, offset: u64) -> StorageResult<()>;

    // ===== Extension: creation-defer-length =====

    /// One-time resolution of a deferred length.
    async fn set_length(&self, _id: UploadId, _length: u64) -> StorageResult<()> {
        Err(StorageError::Unsupported("creation-defer-length"))
    }

    // ===== Extension: checksum =====

    /// Digest of stored bytes in `[from, to)`.
    async fn digest_range(
        &self,
        _id: UploadId,
        _algorithm: ChecksumAlgorithm,
        _from: u64,
        _to: u64,
    ) -> StorageResult<Vec<u8>> {
        Err(StorageError::Unsupported("checksum"))
    }

    // ===== Extension: concatenation =====

    /// Allocate a final upload of the parts' combined length and copy part
    /// bytes into it in order. Part metadata is never copied.
    async fn create_final(
        &self,
        _parts: &[UploadId],
        _metadata: Option<&str>,
    ) -> StorageResult<UploadId> {
        Err(StorageError::Unsupported("concatenation"))
    }

    // ===== Extension: expiration =====

    async fn set_expiration(&self, _id: UploadId, _at: OffsetDateTime) -> StorageResult<()> {
        Err(StorageError::Unsupported("expiration"))
    }

    /// Ids of incomplete uploads whose expiration lies at or before `now`.
    async fn expired_uploads(&self, _now: OffsetDateTime) -> StorageResult<Vec<UploadId>> {
        Err(StorageError::Unsupported("expiration"))
    }
}
