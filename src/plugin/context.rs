//! The exchange context passed through the plugin pipeline
//!
//! An [`Exchange`] is the mutable carrier of in-flight request/response
//! state. It is protocol-agnostic: the HTTP engine populates the structured
//! request/response pair, the byte-stream engines (TCP, UDP) populate the
//! raw byte buffer. Exactly one of the two is populated per event,
//! determined by the owning protocol engine.

use http::{HeaderMap, Method, StatusCode};

/// A buffered, structured HTTP request flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct HttpExchangeRequest {
    /// Request method
    pub method: Method,
    /// URL scheme ("http" or "https")
    pub scheme: String,
    /// Host the request is addressed to (Host header / URL host)
    pub host: String,
    /// URL path
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Buffered request body
    pub body: Vec<u8>,
}

impl HttpExchangeRequest {
    /// Render the full request URL.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}://{}{}?{}", self.scheme, self.host, self.path, q),
            None => format!("{}://{}{}", self.scheme, self.host, self.path),
        }
    }
}

/// A buffered, structured HTTP response flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct HttpExchangeResponse {
    /// Response status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Buffered response body
    pub body: Vec<u8>,
}

impl HttpExchangeResponse {
    /// Create a response with the given status and body and no headers.
    pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// The request context given to middleware and symptoms.
///
/// Created by a protocol engine immediately before the `PreDispatch` event,
/// mutated in place by the chain, and carried through to `PostDispatch` for
/// the same exchange so tamper effects compose. Discarded when the exchange
/// completes.
#[derive(Debug, Default)]
pub struct Exchange {
    /// Structured HTTP request, if this is an HTTP-proxied event.
    pub request: Option<HttpExchangeRequest>,

    /// Structured HTTP response, populated after the upstream round trip —
    /// or earlier, by a short-circuiting symptom such as `http_error`.
    pub response: Option<HttpExchangeResponse>,

    /// Current message bytes for TCP/UDP sessions.
    pub bytes: Option<Vec<u8>>,
}

impl Exchange {
    /// Create an exchange around a structured HTTP request.
    pub fn for_http(request: HttpExchangeRequest) -> Self {
        Self {
            request: Some(request),
            response: None,
            bytes: None,
        }
    }

    /// Create an exchange around a raw byte payload.
    pub fn for_bytes(bytes: Vec<u8>) -> Self {
        Self {
            request: None,
            response: None,
            bytes: Some(bytes),
        }
    }

    /// Whether this exchange carries a structured HTTP request.
    pub fn is_http(&self) -> bool {
        self.request.is_some()
    }
}
