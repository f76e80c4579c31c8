//! The protocol engine: resolve, lock, validate, execute, respond.

use crate::checksum::{ChunkVerdict, verify_chunk};
use crate::concat::assemble_final;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{EventSink, NoopEventSink};
use crate::intent::{self, Intent};
use crate::request::{HandleOutcome, Request, Response};
use crate::validation::{self, ChecksumDeclaration, ConcatPlan};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use stowage_core::{
    ConcatRole, ExpirationPolicy, PROTOCOL_VERSION, ProtocolConfig, UploadId, headers,
};
use stowage_storage::{
    AppendCompletion, BytesSource, ContentSource, LockProvider, StoreCapabilities, UploadStore,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

/// Drives one protocol exchange end to end.
///
/// Mutating intents (write, delete, chained creation writes) take the
/// per-upload lock before touching store state, including the existence
/// check, so a racing delete and write cannot interleave. The lock guard
/// releases on every exit path. Reads (file info) take no lock and may
/// observe a slightly stale offset while a write is in flight.
pub struct ProtocolEngine {
    store: Arc<dyn UploadStore>,
    locks: Arc<dyn LockProvider>,
    events: Arc<dyn EventSink>,
    config: ProtocolConfig,
    checksum_mismatch_status: StatusCode,
}

/// Result of one append run, after checksum verification.
struct AppendSummary {
    offset: u64,
    expires: Option<OffsetDateTime>,
    disconnected: bool,
}

impl ProtocolEngine {
    pub fn new(
        store: Arc<dyn UploadStore>,
        locks: Arc<dyn LockProvider>,
        config: ProtocolConfig,
    ) -> Self {
        let checksum_mismatch_status = StatusCode::from_u16(config.checksum_mismatch_status)
            .ok()
            .or_else(|| StatusCode::from_u16(460).ok())
            .unwrap_or(StatusCode::CONFLICT);
        Self {
            store,
            locks,
            events: Arc::new(NoopEventSink),
            config,
            checksum_mismatch_status,
        }
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> Arc<dyn UploadStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Handle one exchange.
    pub async fn handle(&self, mut request: Request, cancel: CancellationToken) -> HandleOutcome {
        let capabilities = self.store.capabilities();
        let intent = intent::resolve(&request, &self.config.base_path, &capabilities);
        tracing::debug!(?intent, method = %request.method, path = %request.path, "resolved intent");

        match intent {
            Intent::NotApplicable => return HandleOutcome::NotApplicable(request),
            Intent::GetOptions => {
                return HandleOutcome::Response(self.options_response(&capabilities));
            }
            _ => {}
        }

        if let Err(e) = validation::require_version(&request) {
            return HandleOutcome::Response(self.error_response(e));
        }

        let result = match intent {
            Intent::CreateFile => {
                self.create(&mut request, ConcatRole::Standalone, &cancel)
                    .await
            }
            Intent::ConcatenateFiles => self.concatenate(&mut request, &cancel).await,
            Intent::WriteFile(segment) => self.write(&mut request, &segment, &cancel).await,
            Intent::GetFileInfo(segment) => self.file_info(&segment).await,
            Intent::DeleteFile(segment) => self.delete(&segment).await,
            Intent::GetOptions | Intent::NotApplicable => unreachable!("handled above"),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => HandleOutcome::Response(self.error_response(e)),
        }
    }

    // ===== Intent execution =====

    async fn create(
        &self,
        request: &mut Request,
        role: ConcatRole,
        cancel: &CancellationToken,
    ) -> ProtocolResult<HandleOutcome> {
        let capabilities = self.store.capabilities();
        if !capabilities.creation {
            return Err(ProtocolError::UnsupportedExtension("creation"));
        }
        let plan = validation::validate_create(request, &capabilities, &self.config)?;
        self.events
            .before_create(plan.length, plan.metadata.as_deref())
            .await
            .map_err(ProtocolError::InvalidRequest)?;

        let id = self
            .store
            .create(plan.length, plan.metadata.as_deref(), role)
            .await?;
        let expires = self.apply_expiration(id).await?;
        self.events.on_created(id).await;
        tracing::info!(%id, length = ?plan.length, "upload created");

        // A zero-length upload is born complete; no write will ever arrive.
        if plan.length == Some(0) {
            self.events.on_file_complete(id).await;
        }

        let mut chained: Option<AppendSummary> = None;
        if self.should_chain_write(request, &capabilities) {
            let guard = self
                .locks
                .try_acquire(id)?
                .ok_or(ProtocolError::Locked)?;
            let declaration =
                validation::checksum_declaration(request, &capabilities, self.store.as_ref())?;
            let summary = self.run_append(request, id, declaration, cancel).await;
            guard.release();
            let summary = summary?;
            if summary.disconnected {
                return Ok(HandleOutcome::Abandoned);
            }
            chained = Some(summary);
        }

        let mut response = self.base_response(StatusCode::CREATED);
        set_header(
            &mut response.headers,
            headers::LOCATION,
            &format!("{}/{}", self.config.base_path.trim_end_matches('/'), id),
        );
        if let Some(summary) = &chained {
            set_header(
                &mut response.headers,
                headers::UPLOAD_OFFSET,
                &summary.offset.to_string(),
            );
        }
        let expires = chained.and_then(|s| s.expires).or(expires);
        self.set_expires_header(&mut response.headers, expires);
        Ok(HandleOutcome::Response(response))
    }

    async fn concatenate(
        &self,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> ProtocolResult<HandleOutcome> {
        let plan = validation::validate_concat(request, self.store.as_ref(), &self.config).await?;
        match plan {
            // A partial target behaves like creation, including write chaining.
            ConcatPlan::Partial => self.create(request, ConcatRole::Partial, cancel).await,
            ConcatPlan::Final {
                parts,
                metadata,
                total,
            } => {
                self.events
                    .before_create(Some(total), metadata.as_deref())
                    .await
                    .map_err(ProtocolError::InvalidRequest)?;
                let id =
                    assemble_final(self.store.as_ref(), &parts, metadata.as_deref(), &self.config)
                        .await?;
                self.events.on_created(id).await;
                // A final upload is born complete.
                self.events.on_file_complete(id).await;

                let mut response = self.base_response(StatusCode::CREATED);
                set_header(
                    &mut response.headers,
                    headers::LOCATION,
                    &format!("{}/{}", self.config.base_path.trim_end_matches('/'), id),
                );
                Ok(HandleOutcome::Response(response))
            }
        }
    }

    async fn write(
        &self,
        request: &mut Request,
        segment: &str,
        cancel: &CancellationToken,
    ) -> ProtocolResult<HandleOutcome> {
        let Ok(id) = UploadId::parse(segment) else {
            return Err(ProtocolError::NotFound);
        };
        // Lock before the existence check so a racing delete cannot
        // interleave with this write.
        let guard = self.locks.try_acquire(id)?.ok_or(ProtocolError::Locked)?;
        let result = self.locked_write(request, id, cancel).await;
        guard.release();
        result
    }

    async fn locked_write(
        &self,
        request: &mut Request,
        id: UploadId,
        cancel: &CancellationToken,
    ) -> ProtocolResult<HandleOutcome> {
        let capabilities = self.store.capabilities();
        if !self.store.exists(id).await? {
            return Err(ProtocolError::NotFound);
        }
        let info = self.store.info(id).await?;
        let plan = validation::validate_write(
            request,
            &info,
            self.store.as_ref(),
            &capabilities,
            &self.config,
            OffsetDateTime::now_utc(),
        )
        .await?;

        if let Some(length) = plan.new_length {
            self.store.set_length(id, length).await?;
            tracing::debug!(%id, length, "deferred length resolved");
        }

        let summary = self.run_append(request, id, plan.checksum, cancel).await?;
        if summary.disconnected {
            return Ok(HandleOutcome::Abandoned);
        }

        let mut response = self.base_response(StatusCode::NO_CONTENT);
        set_header(
            &mut response.headers,
            headers::UPLOAD_OFFSET,
            &summary.offset.to_string(),
        );
        self.set_expires_header(&mut response.headers, summary.expires);
        Ok(HandleOutcome::Response(response))
    }

    async fn file_info(&self, segment: &str) -> ProtocolResult<HandleOutcome> {
        let Ok(id) = UploadId::parse(segment) else {
            return Err(ProtocolError::NotFound);
        };
        if !self.store.exists(id).await? {
            return Err(ProtocolError::NotFound);
        }
        let info = self.store.info(id).await?;
        if info.is_expired(OffsetDateTime::now_utc()) {
            return Err(ProtocolError::NotFound);
        }

        let mut response = self.base_response(StatusCode::OK);
        set_header(
            &mut response.headers,
            headers::UPLOAD_OFFSET,
            &info.offset.to_string(),
        );
        match info.length {
            Some(length) => set_header(
                &mut response.headers,
                headers::UPLOAD_LENGTH,
                &length.to_string(),
            ),
            None => set_header(&mut response.headers, headers::UPLOAD_DEFER_LENGTH, "1"),
        }
        if let Some(metadata) = &info.metadata {
            set_header(&mut response.headers, headers::UPLOAD_METADATA, metadata);
        }
        if let Some(concat) = info.concat.to_header(&self.config.base_path) {
            set_header(&mut response.headers, headers::UPLOAD_CONCAT, &concat);
        }
        self.set_expires_header(&mut response.headers, info.expires_at);
        Ok(HandleOutcome::Response(response))
    }

    async fn delete(&self, segment: &str) -> ProtocolResult<HandleOutcome> {
        let Ok(id) = UploadId::parse(segment) else {
            return Err(ProtocolError::NotFound);
        };
        let guard = self.locks.try_acquire(id)?.ok_or(ProtocolError::Locked)?;
        let result = self.locked_delete(id).await;
        guard.release();
        result
    }

    async fn locked_delete(&self, id: UploadId) -> ProtocolResult<HandleOutcome> {
        if !self.store.exists(id).await? {
            return Err(ProtocolError::NotFound);
        }
        let info = self.store.info(id).await?;
        if info.is_expired(OffsetDateTime::now_utc()) {
            // Expired uploads answer 404; removal is the sweeper's job.
            return Err(ProtocolError::NotFound);
        }
        self.events
            .before_delete(id)
            .await
            .map_err(ProtocolError::InvalidRequest)?;
        self.store.delete(id).await?;
        self.events.on_deleted(id).await;
        tracing::info!(%id, "upload deleted");
        Ok(HandleOutcome::Response(
            self.base_response(StatusCode::NO_CONTENT),
        ))
    }

    // ===== Shared write path =====

    /// Append the request body, verify the chunk, fire the completion
    /// notification when the upload transitions to complete, and refresh a
    /// sliding expiration. Caller holds the upload's lock.
    async fn run_append(
        &self,
        request: &mut Request,
        id: UploadId,
        declaration: ChecksumDeclaration,
        cancel: &CancellationToken,
    ) -> ProtocolResult<AppendSummary> {
        let mut source: Box<dyn ContentSource> = request
            .body
            .take()
            .unwrap_or_else(|| Box::new(BytesSource::empty()));

        let append = self.store.append(id, source.as_mut(), cancel).await?;
        let disconnected = append.completion == AppendCompletion::Disconnected;

        let verdict = verify_chunk(
            self.store.as_ref(),
            id,
            declaration,
            source.trailing_checksum(),
            &append,
        )
        .await?;
        if verdict == ChunkVerdict::Rejected {
            if disconnected {
                // The rollback already happened; nothing to report to a
                // client that went away.
                return Ok(AppendSummary {
                    offset: self.store.offset(id).await?,
                    expires: None,
                    disconnected: true,
                });
            }
            return Err(ProtocolError::ChecksumMismatch);
        }

        let offset = self.store.offset(id).await?;
        let length = self.store.length(id).await?;
        // Validation guaranteed the upload was incomplete before this run, so
        // reaching the declared length here is the one completion transition.
        let complete = length.is_some_and(|len| offset >= len);
        if complete {
            self.events.on_file_complete(id).await;
            tracing::info!(%id, offset, "upload complete");
        }

        let expires = if !complete && self.is_sliding_expiration() {
            self.apply_expiration(id).await?
        } else {
            None
        };

        Ok(AppendSummary {
            offset,
            expires,
            disconnected,
        })
    }

    fn should_chain_write(&self, request: &Request, capabilities: &StoreCapabilities) -> bool {
        if !capabilities.creation_with_upload || request.body.is_none() {
            return false;
        }
        // Without a parseable content-length, body availability cannot be
        // determined; skip chaining silently.
        request
            .header(headers::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .is_some_and(|n| n > 0)
    }

    // ===== Expiration =====

    fn is_sliding_expiration(&self) -> bool {
        self.config
            .expiration
            .as_ref()
            .is_some_and(|e| e.policy == ExpirationPolicy::Sliding)
    }

    /// Stamp (or re-stamp) the upload's expiration from the configured TTL.
    async fn apply_expiration(&self, id: UploadId) -> ProtocolResult<Option<OffsetDateTime>> {
        let Some(expiration) = &self.config.expiration else {
            return Ok(None);
        };
        if !self.store.capabilities().expiration {
            return Ok(None);
        }
        let at = OffsetDateTime::now_utc() + expiration.ttl();
        self.store.set_expiration(id, at).await?;
        Ok(Some(at))
    }

    // ===== Response building =====

    fn base_response(&self, status: StatusCode) -> Response {
        let mut response = Response::new(status);
        set_header(&mut response.headers, headers::TUS_RESUMABLE, PROTOCOL_VERSION);
        set_header(&mut response.headers, headers::CACHE_CONTROL, "no-store");
        response
    }

    fn options_response(&self, capabilities: &StoreCapabilities) -> Response {
        let mut response = self.base_response(StatusCode::NO_CONTENT);
        set_header(&mut response.headers, headers::TUS_VERSION, PROTOCOL_VERSION);

        let mut extensions = capabilities.extension_names();
        // Expiration is only live when both the store and the config enable it.
        if self.config.expiration.is_none() {
            extensions.retain(|name| *name != "expiration");
        }
        if !extensions.is_empty() {
            set_header(
                &mut response.headers,
                headers::TUS_EXTENSION,
                &extensions.join(","),
            );
        }
        if capabilities.checksum {
            let algorithms: Vec<&str> = self
                .store
                .checksum_algorithms()
                .iter()
                .map(|a| a.as_str())
                .collect();
            set_header(
                &mut response.headers,
                headers::TUS_CHECKSUM_ALGORITHM,
                &algorithms.join(","),
            );
        }
        if let Some(max) = self.config.max_size {
            set_header(&mut response.headers, headers::TUS_MAX_SIZE, &max.to_string());
        }
        response
    }

    fn set_expires_header(&self, map: &mut HeaderMap, at: Option<OffsetDateTime>) {
        if let Some(at) = at {
            if let Ok(value) = at.format(&Rfc3339) {
                set_header(map, headers::UPLOAD_EXPIRES, &value);
            }
        }
    }

    fn error_response(&self, err: ProtocolError) -> Response {
        let status = err.status_code(self.checksum_mismatch_status);
        tracing::debug!(code = err.code(), %status, "request rejected: {err}");
        let mut response = self.base_response(status);
        set_header(&mut response.headers, headers::CONTENT_TYPE, "text/plain");
        response.body = Some(Bytes::from(err.to_string()));
        response
    }
}

/// Insert a known-name header, skipping values that cannot be represented.
fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
