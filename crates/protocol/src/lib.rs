//! Resumable-upload protocol engine.
//!
//! The engine classifies an inbound exchange into an [`Intent`], takes the
//! per-upload lock for mutating intents, runs the ordered validation
//! pipeline, executes against the storage engine, and releases the lock on
//! every exit path. Hosting concerns (HTTP framework adaptation, wiring,
//! event fan-out) stay outside, behind [`Request`]/[`Response`] and
//! [`EventSink`].

mod checksum;
mod concat;
pub mod engine;
pub mod error;
pub mod events;
pub mod intent;
pub mod request;
pub mod sweeper;
mod validation;

pub use engine::ProtocolEngine;
pub use error::{ProtocolError, ProtocolResult};
pub use events::{EventSink, NoopEventSink};
pub use intent::Intent;
pub use request::{HandleOutcome, Request, Response};
pub use sweeper::{ExpirationSweeper, SweepReport};
