//! Shared harness: a protocol engine over a disk store in a temp directory.

#![allow(dead_code)]

use http::{Method, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stowage_core::{OFFSET_STREAM_CONTENT_TYPE, PROTOCOL_VERSION, ProtocolConfig, headers};
use stowage_protocol::{EventSink, HandleOutcome, ProtocolEngine, Request, Response};
use stowage_storage::{BytesSource, DiskStore, InMemoryLockProvider};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub engine: Arc<ProtocolEngine>,
    pub locks: Arc<InMemoryLockProvider>,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(ProtocolConfig::default()).await
}

pub async fn harness_with(config: ProtocolConfig) -> Harness {
    build(config, None).await
}

pub async fn harness_with_events(
    config: ProtocolConfig,
    events: Arc<dyn EventSink>,
) -> Harness {
    build(config, Some(events)).await
}

async fn build(config: ProtocolConfig, events: Option<Arc<dyn EventSink>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskStore::new(dir.path()).await.unwrap());
    let locks = Arc::new(InMemoryLockProvider::new());
    let lock_provider: Arc<dyn stowage_storage::LockProvider> = Arc::clone(&locks) as _;
    let mut engine = ProtocolEngine::new(store, lock_provider, config);
    if let Some(events) = events {
        engine = engine.with_events(events);
    }
    Harness {
        engine: Arc::new(engine),
        locks,
        _dir: dir,
    }
}

/// A request carrying the protocol version header.
pub fn request(method: Method, path: &str) -> Request {
    Request::new(method, path).with_header(headers::TUS_RESUMABLE, PROTOCOL_VERSION)
}

/// Run one exchange and unwrap the response.
pub async fn respond(engine: &ProtocolEngine, req: Request) -> Response {
    match engine.handle(req, CancellationToken::new()).await {
        HandleOutcome::Response(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

/// The id segment from a creation response's location header.
pub fn id_from(response: &Response) -> String {
    response
        .header(headers::LOCATION)
        .expect("location header")
        .rsplit('/')
        .next()
        .unwrap()
        .to_string()
}

/// Create an upload of the given length; returns its id segment.
pub async fn create_upload(engine: &ProtocolEngine, length: u64) -> String {
    let req = request(Method::POST, "/files")
        .with_header(headers::UPLOAD_LENGTH, &length.to_string());
    let response = respond(engine, req).await;
    assert_eq!(response.status, StatusCode::CREATED);
    id_from(&response)
}

/// A write request at `offset` carrying `body`, without sending it yet.
pub fn patch_request(id: &str, offset: u64, body: &[u8]) -> Request {
    request(Method::PATCH, &format!("/files/{id}"))
        .with_header(headers::CONTENT_TYPE, OFFSET_STREAM_CONTENT_TYPE)
        .with_header(headers::UPLOAD_OFFSET, &offset.to_string())
        .with_header(headers::CONTENT_LENGTH, &body.len().to_string())
        .with_body(BytesSource::new(body.to_vec()))
}

/// Append `body` at `offset` and unwrap the response.
pub async fn patch(engine: &ProtocolEngine, id: &str, offset: u64, body: &[u8]) -> Response {
    respond(engine, patch_request(id, offset, body)).await
}

/// Point-in-time view of an upload via a HEAD exchange.
pub async fn head(engine: &ProtocolEngine, id: &str) -> Response {
    respond(engine, request(Method::HEAD, &format!("/files/{id}"))).await
}

/// Event sink counting lifecycle notifications.
#[derive(Default)]
pub struct RecordingSink {
    pub created: AtomicUsize,
    pub completed: AtomicUsize,
    pub deleted: AtomicUsize,
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn on_created(&self, _id: stowage_core::UploadId) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_file_complete(&self, _id: stowage_core::UploadId) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_deleted(&self, _id: stowage_core::UploadId) {
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }
}
