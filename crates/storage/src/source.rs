//! Request body abstraction consumed by [`UploadStore::append`].
//!
//! The hosting layer adapts its framework's body type into a
//! [`ContentSource`]; the engine and stores never see framework types.
//!
//! [`UploadStore::append`]: crate::traits::UploadStore::append

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::error::Error;
use std::io;

/// A pull-based source of request body bytes.
///
/// `Sync` is required so futures borrowing a request body across await
/// points stay spawnable.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Read the next chunk, or `None` at end of input.
    ///
    /// Client disconnects surface as `Err` with a kind such as
    /// `BrokenPipe`, `ConnectionReset`, `ConnectionAborted` or
    /// `UnexpectedEof`; see [`is_disconnect`].
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// The trailing `Upload-Checksum` header, if the transport delivered one.
    ///
    /// Only meaningful after the body has been fully consumed; before that
    /// (or on a transport without trailers) this is `None`.
    fn trailing_checksum(&self) -> Option<String> {
        None
    }
}

/// Whether an I/O failure means the client went away rather than a genuine
/// storage-side fault. Walks the error chain so wrapped transport errors are
/// recognised too.
pub fn is_disconnect(err: &io::Error) -> bool {
    fn kind_is_disconnect(kind: io::ErrorKind) -> bool {
        matches!(
            kind,
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof
        )
    }
    if kind_is_disconnect(err.kind()) {
        return true;
    }
    let mut cause: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(inner) = cause {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            if kind_is_disconnect(io_err.kind()) {
                return true;
            }
        }
        cause = inner.source();
    }
    false
}

/// In-memory [`ContentSource`] used by tests and simple hosts.
pub struct BytesSource {
    chunks: VecDeque<Bytes>,
    trailer: Option<String>,
    trailer_visible: bool,
    fail_with: Option<io::ErrorKind>,
}

impl BytesSource {
    /// A source yielding one chunk.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![data.into()])
    }

    /// A source yielding the given chunks in order.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: chunks.into(),
            trailer: None,
            trailer_visible: false,
            fail_with: None,
        }
    }

    /// An empty source.
    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    /// Deliver a trailing `Upload-Checksum` value once the body is consumed.
    pub fn with_trailer(mut self, value: impl Into<String>) -> Self {
        self.trailer = Some(value.into());
        self
    }

    /// After the chunks are exhausted, fail with the given error kind instead
    /// of reporting end of input. Any trailer is withheld.
    pub fn failing_with(mut self, kind: io::ErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }
}

#[async_trait]
impl ContentSource for BytesSource {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        if let Some(kind) = self.fail_with.take() {
            return Err(io::Error::new(kind, "simulated transport failure"));
        }
        self.trailer_visible = true;
        Ok(None)
    }

    fn trailing_checksum(&self) -> Option<String> {
        if self.trailer_visible {
            self.trailer.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_chunks_then_end() {
        let mut source = BytesSource::from_chunks(vec![Bytes::from("ab"), Bytes::from("cd")]);
        assert_eq!(source.next_chunk().await.unwrap(), Some(Bytes::from("ab")));
        assert_eq!(source.next_chunk().await.unwrap(), Some(Bytes::from("cd")));
        assert_eq!(source.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn trailer_hidden_until_body_consumed() {
        let mut source = BytesSource::new("x").with_trailer("sha1 AAAA");
        assert!(source.trailing_checksum().is_none());
        source.next_chunk().await.unwrap();
        source.next_chunk().await.unwrap();
        assert_eq!(source.trailing_checksum().as_deref(), Some("sha1 AAAA"));
    }

    #[tokio::test]
    async fn simulated_disconnect_withholds_trailer() {
        let mut source = BytesSource::new("x")
            .with_trailer("sha1 AAAA")
            .failing_with(io::ErrorKind::BrokenPipe);
        source.next_chunk().await.unwrap();
        let err = source.next_chunk().await.unwrap_err();
        assert!(is_disconnect(&err));
        assert!(source.trailing_checksum().is_none());
    }

    #[test]
    fn disconnect_detection_walks_error_chain() {
        let inner = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset");
        let outer = io::Error::new(io::ErrorKind::Other, inner);
        assert!(is_disconnect(&outer));
        assert!(!is_disconnect(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        )));
    }
}
