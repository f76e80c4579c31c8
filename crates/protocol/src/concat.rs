//! Concatenation: assembling a final upload from complete partials.

use crate::error::ProtocolResult;
use stowage_core::{ProtocolConfig, UploadId};
use stowage_storage::UploadStore;

/// Build a final upload from the validated, ordered part ids.
///
/// The store copies part bytes in order into the new upload; part metadata is
/// never carried over. When configured, the consumed partials are deleted
/// afterwards on a best-effort basis.
pub(crate) async fn assemble_final(
    store: &dyn UploadStore,
    parts: &[UploadId],
    metadata: Option<&str>,
    config: &ProtocolConfig,
) -> ProtocolResult<UploadId> {
    let id = store.create_final(parts, metadata).await?;
    tracing::info!(%id, parts = parts.len(), "final upload assembled");

    if config.delete_partials_after_concat {
        for part in parts {
            if let Err(e) = store.delete(*part).await {
                tracing::warn!(%part, error = %e, "failed to delete consumed partial upload");
            }
        }
    }
    Ok(id)
}
