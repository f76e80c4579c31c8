//! Before/after event-notification surface.
//!
//! The engine invokes these hooks at defined points; implementations live in
//! the hosting layer. `before_*` hooks may veto the operation with a message,
//! which the engine turns into a 400 response before any mutation.

use async_trait::async_trait;
use stowage_core::UploadId;

/// Notification hooks around upload lifecycle transitions.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Runs before a create (or create-partial) mutation. Returning `Err`
    /// vetoes the request.
    async fn before_create(
        &self,
        _length: Option<u64>,
        _metadata: Option<&str>,
    ) -> Result<(), String> {
        Ok(())
    }

    /// A new upload was allocated.
    async fn on_created(&self, _id: UploadId) {}

    /// An upload transitioned to complete. Fired exactly once per upload,
    /// under that upload's lock.
    async fn on_file_complete(&self, _id: UploadId) {}

    /// Runs before a delete mutation. Returning `Err` vetoes the request.
    async fn before_delete(&self, _id: UploadId) -> Result<(), String> {
        Ok(())
    }

    /// An upload was removed.
    async fn on_deleted(&self, _id: UploadId) {}
}

/// Default sink: every hook is a no-op.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {}
