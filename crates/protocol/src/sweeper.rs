//! Out-of-band removal of expired, incomplete uploads.

use std::sync::Arc;
use stowage_core::UploadId;
use stowage_storage::{LockProvider, UploadStore};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// What one sweep pass accomplished.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Uploads removed by this pass.
    pub removed: Vec<UploadId>,
    /// Candidates left in place: lock contention or a failed delete.
    pub skipped: usize,
    /// False when cancellation cut the pass short.
    pub finished: bool,
}

/// Finds and removes expired, incomplete uploads.
///
/// Runs independently of request handling. Takes the per-upload lock before
/// deleting so a sweep can never race a live write; contended ids are skipped
/// and picked up by a later pass.
pub struct ExpirationSweeper {
    store: Arc<dyn UploadStore>,
    locks: Arc<dyn LockProvider>,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn UploadStore>, locks: Arc<dyn LockProvider>) -> Self {
        Self { store, locks }
    }

    /// One best-effort pass. Under cancellation this returns the partial
    /// result accumulated so far rather than erroring.
    pub async fn sweep(&self, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport {
            finished: true,
            ..SweepReport::default()
        };
        let now = OffsetDateTime::now_utc();
        let candidates = match self.store.expired_uploads(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "failed to enumerate expired uploads");
                report.finished = false;
                return report;
            }
        };

        for id in candidates {
            if cancel.is_cancelled() {
                report.finished = false;
                break;
            }
            let guard = match self.locks.try_acquire(id) {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "lock acquisition failed during sweep");
                    report.skipped += 1;
                    continue;
                }
            };
            match self.store.delete(id).await {
                Ok(()) => {
                    tracing::info!(%id, "removed expired upload");
                    report.removed.push(id);
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "failed to remove expired upload");
                    report.skipped += 1;
                }
            }
            guard.release();
        }
        report
    }
}
