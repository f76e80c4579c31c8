//! Expiration stamping, expired-resource behaviour and sweeping.

mod common;

use common::{create_upload, harness_with, head, patch, request, respond};
use http::{Method, StatusCode};
use stowage_core::{ExpirationConfig, ExpirationPolicy, ProtocolConfig, UploadId, headers};
use stowage_protocol::ExpirationSweeper;
use stowage_storage::LockProvider;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

fn expiring_config(policy: ExpirationPolicy, ttl_secs: u64) -> ProtocolConfig {
    ProtocolConfig {
        expiration: Some(ExpirationConfig { policy, ttl_secs }),
        ..ProtocolConfig::default()
    }
}

#[tokio::test]
async fn creation_stamps_an_expiration() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;

    let req = request(Method::POST, "/files").with_header(headers::UPLOAD_LENGTH, "10");
    let response = respond(&h.engine, req).await;
    let stamped = response.header(headers::UPLOAD_EXPIRES).expect("expires header");
    let at = OffsetDateTime::parse(stamped, &Rfc3339).expect("well-formed timestamp");
    assert!(at > OffsetDateTime::now_utc());

    // HEAD reports the same stamp.
    let id = common::id_from(&response);
    let info = head(&h.engine, &id).await;
    assert_eq!(info.header(headers::UPLOAD_EXPIRES), Some(stamped));
}

#[tokio::test]
async fn options_advertises_expiration_only_when_configured() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 60)).await;
    let response = respond(&h.engine, stowage_protocol::Request::new(Method::OPTIONS, "/files")).await;
    assert!(response.header(headers::TUS_EXTENSION).unwrap().contains("expiration"));

    let h = harness_with(ProtocolConfig::default()).await;
    let response = respond(&h.engine, stowage_protocol::Request::new(Method::OPTIONS, "/files")).await;
    assert!(!response.header(headers::TUS_EXTENSION).unwrap().contains("expiration"));
}

#[tokio::test]
async fn sliding_policy_refreshes_on_append() {
    let h = harness_with(expiring_config(ExpirationPolicy::Sliding, 3600)).await;
    let id = create_upload(&h.engine, 10).await;
    let first = head(&h.engine, &id).await;
    let first = first.header(headers::UPLOAD_EXPIRES).unwrap().to_string();

    let response = patch(&h.engine, &id, 0, b"hello").await;
    let refreshed = response.header(headers::UPLOAD_EXPIRES).expect("refreshed stamp");
    let first = OffsetDateTime::parse(&first, &Rfc3339).unwrap();
    let refreshed = OffsetDateTime::parse(refreshed, &Rfc3339).unwrap();
    assert!(refreshed >= first);
}

#[tokio::test]
async fn absolute_policy_never_refreshes() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;
    let id = create_upload(&h.engine, 10).await;
    let stamped = head(&h.engine, &id).await;
    let stamped = stamped.header(headers::UPLOAD_EXPIRES).unwrap().to_string();

    let response = patch(&h.engine, &id, 0, b"hello").await;
    assert!(response.header(headers::UPLOAD_EXPIRES).is_none());
    let info = head(&h.engine, &id).await;
    assert_eq!(info.header(headers::UPLOAD_EXPIRES), Some(stamped.as_str()));
}

#[tokio::test]
async fn expired_uploads_answer_404_without_being_deleted() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;
    let id = create_upload(&h.engine, 10).await;
    let parsed = UploadId::parse(&id).unwrap();

    // Force the stamp into the past.
    let store = h.engine.store();
    store
        .set_expiration(parsed, OffsetDateTime::now_utc() - time::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(head(&h.engine, &id).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        patch(&h.engine, &id, 0, b"hello").await.status,
        StatusCode::NOT_FOUND
    );
    let response = respond(&h.engine, request(Method::DELETE, &format!("/files/{id}"))).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    // The data is still on disk; removal is the sweeper's job.
    assert!(store.exists(parsed).await.unwrap());
}

#[tokio::test]
async fn completed_uploads_never_expire() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;
    let id = create_upload(&h.engine, 5).await;
    patch(&h.engine, &id, 0, b"hello").await;

    let store = h.engine.store();
    store
        .set_expiration(
            UploadId::parse(&id).unwrap(),
            OffsetDateTime::now_utc() - time::Duration::hours(1),
        )
        .await
        .unwrap();

    assert_eq!(head(&h.engine, &id).await.status, StatusCode::OK);
}

#[tokio::test]
async fn sweep_removes_expired_and_skips_locked_uploads() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;
    let expired = create_upload(&h.engine, 10).await;
    let locked = create_upload(&h.engine, 10).await;
    let live = create_upload(&h.engine, 10).await;

    let store = h.engine.store();
    let past = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let expired_id = UploadId::parse(&expired).unwrap();
    let locked_id = UploadId::parse(&locked).unwrap();
    store.set_expiration(expired_id, past).await.unwrap();
    store.set_expiration(locked_id, past).await.unwrap();

    let guard = h.locks.try_acquire(locked_id).unwrap().unwrap();

    let sweeper = ExpirationSweeper::new(h.engine.store(), h.locks.clone());
    let report = sweeper.sweep(&CancellationToken::new()).await;
    assert!(report.finished);
    assert_eq!(report.removed, vec![expired_id]);
    assert_eq!(report.skipped, 1);

    assert!(!store.exists(expired_id).await.unwrap());
    assert!(store.exists(locked_id).await.unwrap());
    assert!(store.exists(UploadId::parse(&live).unwrap()).await.unwrap());

    // The contended id is picked up once the lock is gone.
    guard.release();
    let report = sweeper.sweep(&CancellationToken::new()).await;
    assert_eq!(report.removed, vec![locked_id]);
}

#[tokio::test]
async fn cancelled_sweep_reports_an_unfinished_pass() {
    let h = harness_with(expiring_config(ExpirationPolicy::Absolute, 3600)).await;
    let id = create_upload(&h.engine, 10).await;
    h.engine
        .store()
        .set_expiration(
            UploadId::parse(&id).unwrap(),
            OffsetDateTime::now_utc() - time::Duration::hours(1),
        )
        .await
        .unwrap();

    let sweeper = ExpirationSweeper::new(h.engine.store(), h.locks.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = sweeper.sweep(&cancel).await;
    assert!(!report.finished);
    assert!(report.removed.is_empty());
}
