//! Abstract request/response pair supplied by the hosting layer.
//!
//! The engine never sees framework types: the host adapts its request into a
//! [`Request`] (headers plus a [`ContentSource`] body) and turns the returned
//! [`Response`] back into its own response type.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use stowage_storage::ContentSource;

/// One inbound protocol exchange.
pub struct Request {
    pub method: Method,
    /// URL path, e.g. `/files/<id>`. Query strings are the host's concern.
    pub path: String,
    pub headers: HeaderMap,
    /// Request body, if the host can provide one.
    pub body: Option<Box<dyn ContentSource>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Method with `X-HTTP-Method-Override` applied.
    pub fn effective_method(&self) -> Method {
        self.header(stowage_core::headers::METHOD_OVERRIDE)
            .and_then(|v| v.trim().to_ascii_uppercase().parse::<Method>().ok())
            .unwrap_or_else(|| self.method.clone())
    }

    /// Builder-style header setter for hosts and tests.
    ///
    /// # Panics
    /// Panics if the name or value is not a valid HTTP header token.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes()).expect("valid header name");
        let value = HeaderValue::from_str(value).expect("valid header value");
        self.headers.insert(name, value);
        self
    }

    /// Attach a body source.
    pub fn with_body(mut self, body: impl ContentSource + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// The engine's answer to one exchange.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Plain-text message for error responses; success responses carry none.
    pub body: Option<Bytes>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// What became of one exchange.
#[derive(Debug)]
pub enum HandleOutcome {
    /// The request is not for this protocol; the host should route it on.
    NotApplicable(Request),
    /// A response to emit. Once emitted, its status and headers are the
    /// sole contract.
    Response(Response),
    /// The client disconnected mid-write; no response is sent and the
    /// connection is abandoned.
    Abandoned,
}

impl HandleOutcome {
    /// The response, when there is one.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }
}
