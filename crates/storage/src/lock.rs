//! Per-upload exclusive locking.
//!
//! At most one mutating exchange may hold an upload's lock at a time.
//! Acquisition is immediate and non-blocking; contention is the caller's
//! signal to answer 409 without queueing. The guard releases on drop, so
//! every exit path (success, validation failure after acquisition, storage
//! error, cancellation) releases exactly once.

use crate::error::{StorageError, StorageResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use stowage_core::UploadId;

/// Non-blocking per-upload mutual exclusion.
pub trait LockProvider: Send + Sync {
    /// Try to take the exclusive lock for `id`.
    ///
    /// `Ok(None)` means another mutator currently holds it.
    fn try_acquire(&self, id: UploadId) -> StorageResult<Option<LockGuard>>;
}

/// Held lock; releases when dropped. [`release`](Self::release) is an
/// explicit, idempotent alternative.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the lock now.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Process-wide lock table: a mutex-guarded id set.
#[derive(Default)]
pub struct InMemoryLockProvider {
    held: Arc<Mutex<HashSet<UploadId>>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(&self, id: UploadId) -> StorageResult<Option<LockGuard>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(id) {
            tracing::debug!(%id, "lock contended");
            return Ok(None);
        }
        drop(held);
        let table = Arc::clone(&self.held);
        Ok(Some(LockGuard::new(move || {
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        })))
    }
}

/// Host-wide lock table backed by sentinel files, for deployments where
/// several processes share one disk store.
pub struct DiskLockProvider {
    dir: PathBuf,
}

impl DiskLockProvider {
    /// Create a provider keeping sentinels under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn sentinel_path(&self, id: UploadId) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }
}

impl LockProvider for DiskLockProvider {
    fn try_acquire(&self, id: UploadId) -> StorageResult<Option<LockGuard>> {
        let path = self.sentinel_path(id);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Some(LockGuard::new(move || {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(error = %e, path = %path.display(), "failed to remove lock sentinel");
                    }
                }
            }))),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(%id, "lock sentinel contended");
                Ok(None)
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_lock_excludes_second_acquirer() {
        let provider = InMemoryLockProvider::new();
        let id = UploadId::new();
        let guard = provider.try_acquire(id).unwrap().expect("first acquire");
        assert!(provider.try_acquire(id).unwrap().is_none());
        drop(guard);
        assert!(provider.try_acquire(id).unwrap().is_some());
    }

    #[test]
    fn in_memory_locks_are_per_id() {
        let provider = InMemoryLockProvider::new();
        let _a = provider.try_acquire(UploadId::new()).unwrap().unwrap();
        let _b = provider.try_acquire(UploadId::new()).unwrap().unwrap();
    }

    #[test]
    fn explicit_release_is_idempotent_with_drop() {
        let provider = InMemoryLockProvider::new();
        let id = UploadId::new();
        let guard = provider.try_acquire(id).unwrap().unwrap();
        guard.release();
        // Released exactly once; the id is free again.
        assert!(provider.try_acquire(id).unwrap().is_some());
    }
}
