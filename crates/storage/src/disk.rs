//! Disk-backed upload store.
//!
//! Layout: one raw data file per upload id at `<root>/<id>`, plus one sidecar
//! file per concern (`<id>.length`, `<id>.metadata`, `<id>.concat`,
//! `<id>.expires`, `<id>.chunkstart`, `<id>.chunkcomplete`). Isolating each
//! concern means a partial sidecar write cannot corrupt unrelated state. The
//! current offset is the data file's size, so resumability survives a crash
//! without reconciling a second record.

use crate::error::{StorageError, StorageResult};
use crate::source::{ContentSource, is_disconnect};
use crate::traits::{AppendCompletion, AppendResult, ByteStream, StoreCapabilities, UploadStore};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use stowage_core::{ChecksumAlgorithm, ConcatRole, UploadId};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Write buffer size for the append path (512 KiB).
///
/// Incoming reads accumulate here and hit the data file only when the buffer
/// fills or input ends, batching small reads into larger durable writes.
const WRITE_BUFFER_SIZE: usize = 512 * 1024;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const LENGTH_SUFFIX: &str = "length";
const METADATA_SUFFIX: &str = "metadata";
const CONCAT_SUFFIX: &str = "concat";
const EXPIRES_SUFFIX: &str = "expires";
const CHUNK_START_SUFFIX: &str = "chunkstart";
const CHUNK_COMPLETE_SUFFIX: &str = "chunkcomplete";

/// Disk-backed [`UploadStore`].
pub struct DiskStore {
    root: PathBuf,
    capabilities: StoreCapabilities,
}

impl DiskStore {
    /// Create a store rooted at `root` with every extension enabled.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_capabilities(root, StoreCapabilities::full()).await
    }

    /// Create a store advertising only the given capabilities.
    pub async fn with_capabilities(
        root: impl AsRef<Path>,
        capabilities: StoreCapabilities,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, capabilities })
    }

    fn data_path(&self, id: UploadId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn sidecar_path(&self, id: UploadId, suffix: &str) -> PathBuf {
        self.root.join(format!("{id}.{suffix}"))
    }

    async fn require_exists(&self, id: UploadId) -> StorageResult<()> {
        if fs::try_exists(self.data_path(id)).await? {
            Ok(())
        } else {
            Err(StorageError::NotFound(id.to_string()))
        }
    }

    async fn read_sidecar(&self, id: UploadId, suffix: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.sidecar_path(id, suffix)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write_sidecar(&self, id: UploadId, suffix: &str, value: &str) -> StorageResult<()> {
        fs::write(self.sidecar_path(id, suffix), value).await?;
        Ok(())
    }

    async fn remove_sidecar(&self, id: UploadId, suffix: &str) -> StorageResult<()> {
        match fs::remove_file(self.sidecar_path(id, suffix)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn flush_buffer(
        file: &mut fs::File,
        buffer: &mut Vec<u8>,
        written: &mut u64,
    ) -> StorageResult<()> {
        if !buffer.is_empty() {
            file.write_all(buffer).await?;
            *written += buffer.len() as u64;
            buffer.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl UploadStore for DiskStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    #[instrument(skip(self, metadata), fields(store = "disk"))]
    async fn create(
        &self,
        length: Option<u64>,
        metadata: Option<&str>,
        role: ConcatRole,
    ) -> StorageResult<UploadId> {
        let id = UploadId::new();
        let data_path = self.data_path(id);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        if let Some(length) = length {
            self.write_sidecar(id, LENGTH_SUFFIX, &length.to_string())
                .await?;
        }
        if let Some(metadata) = metadata {
            self.write_sidecar(id, METADATA_SUFFIX, metadata).await?;
        }
        if role != ConcatRole::Standalone {
            self.write_sidecar(id, CONCAT_SUFFIX, &role.to_record())
                .await?;
        }
        tracing::debug!(%id, ?length, "created upload");
        Ok(id)
    }

    async fn exists(&self, id: UploadId) -> StorageResult<bool> {
        Ok(fs::try_exists(self.data_path(id)).await?)
    }

    async fn offset(&self, id: UploadId) -> StorageResult<u64> {
        match fs::metadata(self.data_path(id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn length(&self, id: UploadId) -> StorageResult<Option<u64>> {
        self.require_exists(id).await?;
        match self.read_sidecar(id, LENGTH_SUFFIX).await? {
            Some(value) => {
                let length = value.trim().parse::<u64>().map_err(|e| {
                    StorageError::InvalidRecord(format!("length sidecar for {id}: {e}"))
                })?;
                Ok(Some(length))
            }
            None => Ok(None),
        }
    }

    async fn metadata(&self, id: UploadId) -> StorageResult<Option<String>> {
        self.require_exists(id).await?;
        self.read_sidecar(id, METADATA_SUFFIX).await
    }

    async fn concat_role(&self, id: UploadId) -> StorageResult<ConcatRole> {
        self.require_exists(id).await?;
        match self.read_sidecar(id, CONCAT_SUFFIX).await? {
            Some(record) => ConcatRole::from_record(&record).map_err(|e| {
                StorageError::InvalidRecord(format!("concat sidecar for {id}: {e}"))
            }),
            None => Ok(ConcatRole::Standalone),
        }
    }

    async fn expiration(&self, id: UploadId) -> StorageResult<Option<OffsetDateTime>> {
        self.require_exists(id).await?;
        match self.read_sidecar(id, EXPIRES_SUFFIX).await? {
            Some(value) => {
                let at = OffsetDateTime::parse(value.trim(), &Rfc3339).map_err(|e| {
                    StorageError::InvalidRecord(format!("expires sidecar for {id}: {e}"))
                })?;
                Ok(Some(at))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, source, cancel), fields(store = "disk"))]
    async fn append(
        &self,
        id: UploadId,
        source: &mut dyn ContentSource,
        cancel: &CancellationToken,
    ) -> StorageResult<AppendResult> {
        self.require_exists(id).await?;
        let declared = self.length(id).await?;
        let start = self.offset(id).await?;

        // Chunk provenance discipline: record where this append begins and
        // clear any stale completion marker before the first byte lands.
        self.write_sidecar(id, CHUNK_START_SUFFIX, &start.to_string())
            .await?;
        self.remove_sidecar(id, CHUNK_COMPLETE_SUFFIX).await?;

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.data_path(id))
            .await?;
        let mut buffer: Vec<u8> = Vec::with_capacity(WRITE_BUFFER_SIZE);
        let mut written: u64 = 0;

        let completion = loop {
            if cancel.is_cancelled() {
                break AppendCompletion::Cancelled;
            }
            match source.next_chunk().await {
                Ok(None) => break AppendCompletion::Finished,
                Ok(Some(chunk)) => {
                    if let Some(limit) = declared {
                        let after = start + written + (buffer.len() + chunk.len()) as u64;
                        if after > limit {
                            // Already-buffered bytes fit the declared length;
                            // keep them durable, reject the rest.
                            Self::flush_buffer(&mut file, &mut buffer, &mut written).await?;
                            file.flush().await?;
                            return Err(StorageError::SizeExceeded { declared: limit });
                        }
                    }
                    buffer.extend_from_slice(&chunk);
                    if buffer.len() >= WRITE_BUFFER_SIZE {
                        Self::flush_buffer(&mut file, &mut buffer, &mut written).await?;
                    }
                }
                Err(e) if is_disconnect(&e) => break AppendCompletion::Disconnected,
                Err(e) => {
                    Self::flush_buffer(&mut file, &mut buffer, &mut written).await?;
                    file.flush().await?;
                    return Err(StorageError::Io(e));
                }
            }
        };

        Self::flush_buffer(&mut file, &mut buffer, &mut written).await?;
        file.flush().await?;
        tracing::debug!(%id, written, ?completion, "append finished");
        Ok(AppendResult {
            bytes_written: written,
            completion,
        })
    }

    #[instrument(skip(self), fields(store = "disk"))]
    async fn delete(&self, id: UploadId) -> StorageResult<()> {
        match fs::remove_file(self.data_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        for suffix in [
            LENGTH_SUFFIX,
            METADATA_SUFFIX,
            CONCAT_SUFFIX,
            EXPIRES_SUFFIX,
            CHUNK_START_SUFFIX,
            CHUNK_COMPLETE_SUFFIX,
        ] {
            self.remove_sidecar(id, suffix).await?;
        }
        tracing::debug!(%id, "deleted upload");
        Ok(())
    }

    async fn read_back(&self, id: UploadId) -> StorageResult<ByteStream> {
        let file = match fs::File::open(self.data_path(id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
            .map(|result| result.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    async fn chunk_start(&self, id: UploadId) -> StorageResult<Option<u64>> {
        self.require_exists(id).await?;
        match self.read_sidecar(id, CHUNK_START_SUFFIX).await? {
            Some(value) => {
                let offset = value.trim().parse::<u64>().map_err(|e| {
                    StorageError::InvalidRecord(format!("chunkstart sidecar for {id}: {e}"))
                })?;
                Ok(Some(offset))
            }
            None => Ok(None),
        }
    }

    async fn is_chunk_complete(&self, id: UploadId) -> StorageResult<bool> {
        self.require_exists(id).await?;
        Ok(fs::try_exists(self.sidecar_path(id, CHUNK_COMPLETE_SUFFIX)).await?)
    }

    async fn mark_chunk_complete(&self, id: UploadId) -> StorageResult<()> {
        self.require_exists(id).await?;
        self.write_sidecar(id, CHUNK_COMPLETE_SUFFIX, "").await
    }

    async fn truncate(&self, id: UploadId, offset: u64) -> StorageResult<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.data_path(id))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(id.to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;
        file.set_len(offset).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn set_length(&self, id: UploadId, length: u64) -> StorageResult<()> {
        self.require_exists(id).await?;
        if self.length(id).await?.is_some() {
            return Err(StorageError::LengthAlreadySet(id.to_string()));
        }
        self.write_sidecar(id, LENGTH_SUFFIX, &length.to_string())
            .await
    }

    async fn digest_range(
        &self,
        id: UploadId,
        algorithm: ChecksumAlgorithm,
        from: u64,
        to: u64,
    ) -> StorageResult<Vec<u8>> {
        self.require_exists(id).await?;
        let mut file = fs::File::open(self.data_path(id)).await?;
        file.seek(std::io::SeekFrom::Start(from)).await?;
        let mut hasher = algorithm.hasher();
        let mut remaining = to.saturating_sub(from);
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }
        Ok(hasher.finalize())
    }

    #[instrument(skip(self, metadata), fields(store = "disk"))]
    async fn create_final(
        &self,
        parts: &[UploadId],
        metadata: Option<&str>,
    ) -> StorageResult<UploadId> {
        let mut total: u64 = 0;
        for part in parts {
            let length = self.length(*part).await?.ok_or_else(|| {
                StorageError::InvalidRecord(format!("part {part} has no declared length"))
            })?;
            total += length;
        }
        let id = self
            .create(
                Some(total),
                metadata,
                ConcatRole::Final {
                    parts: parts.to_vec(),
                },
            )
            .await?;
        let mut out = fs::OpenOptions::new()
            .append(true)
            .open(self.data_path(id))
            .await?;
        for part in parts {
            let mut src = fs::File::open(self.data_path(*part)).await?;
            tokio::io::copy(&mut src, &mut out).await?;
        }
        out.flush().await?;
        tracing::debug!(%id, total, parts = parts.len(), "assembled final upload");
        Ok(id)
    }

    async fn set_expiration(&self, id: UploadId, at: OffsetDateTime) -> StorageResult<()> {
        self.require_exists(id).await?;
        let value = at
            .format(&Rfc3339)
            .map_err(|e| StorageError::InvalidRecord(format!("expires for {id}: {e}")))?;
        self.write_sidecar(id, EXPIRES_SUFFIX, &value).await
    }

    async fn expired_uploads(&self, now: OffsetDateTime) -> StorageResult<Vec<UploadId>> {
        let mut expired = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Sidecars carry a suffix; bare names are data files.
            if name.contains('.') {
                continue;
            }
            let Ok(id) = UploadId::parse(name) else {
                continue;
            };
            // A corrupt sidecar or a concurrently deleted upload must not
            // poison the whole listing; skip that id and keep going.
            let info = match self.info(id).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "skipping unreadable upload in expiry listing");
                    continue;
                }
            };
            if info.is_expired(now) {
                expired.push(id);
            }
        }
        Ok(expired)
    }
}
