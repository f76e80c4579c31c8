//! Durable, resumable byte storage for the stowage upload engine.
//!
//! This crate provides:
//! - The [`UploadStore`] trait: a resumable byte store with sidecar state
//!   (length, metadata, concatenation record, expiration, chunk provenance)
//! - The disk-backed implementation: one raw data file per upload plus one
//!   sidecar file per concern
//! - Per-upload exclusive locking: an in-process provider and a disk-sentinel
//!   provider for multi-process deployments

pub mod disk;
pub mod error;
pub mod lock;
pub mod source;
pub mod traits;

pub use disk::DiskStore;
pub use error::{StorageError, StorageResult};
pub use lock::{DiskLockProvider, InMemoryLockProvider, LockGuard, LockProvider};
pub use source::{BytesSource, ContentSource};
pub use traits::{AppendCompletion, AppendResult, ByteStream, StoreCapabilities, UploadStore};
