//! Transport abstraction for fedline.
//!
//! This module provides a pluggable request/response layer that abstracts
//! the underlying HTTP stack (reqwest, mock for testing).
//!
//! # Design
//!
//! A [`Request`] names its endpoint in one of three forms:
//! - an NSID such as `app.bsky.feed.getTimeline`, sent to `{service}/xrpc/{nsid}`
//! - a path such as `/.well-known/oauth-authorization-server`, relative to the service
//! - an absolute `https://` URL, used as-is (authorization server endpoints)
//!
//! A transport returns every HTTP response, whatever its status. Turning
//! non-2xx statuses into errors is left to the caller.

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use zeroize::Zeroize;

use fedline_types::Secret;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The peer reset the connection.
    #[error("connection reset")]
    ConnectionReset,

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Host unreachable or DNS failure.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The device has no network.
    #[error("no internet connection")]
    NoInternet,

    /// Data roaming is switched off.
    #[error("roaming disabled")]
    RoamingDisabled,

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The server broke the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server answered with a non-2xx status.
    #[error("http status {status}: {}", .error.as_deref().unwrap_or("no error code"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error code from the body (`error` field).
        error: Option<String>,
        /// Error message from the body.
        message: Option<String>,
    },
}

impl TransportError {
    /// Build a status error from a non-2xx response, reading the error code
    /// from the body when there is one.
    pub fn from_response(response: &Response) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<String>,
            message: Option<String>,
            error_description: Option<String>,
        }

        let body: Option<ErrorBody> = serde_json::from_slice(&response.body).ok();
        let (error, message) = match body {
            Some(b) => (b.error, b.message.or(b.error_description)),
            None => (None, None),
        };
        Self::Status {
            status: response.status,
            error,
            message,
        }
    }

    /// The HTTP status, for status errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The body error code, for status errors.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Status { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// Request body.
///
/// Form values and sealed documents are zeroed when the body is dropped,
/// so the per-attempt clones a retry makes do not outlive the call.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// JSON document.
    Json(serde_json::Value),
    /// Serialized JSON document carrying credentials.
    SealedJson(Secret),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Body::Form(pairs) = self {
            for (_, value) in pairs.iter_mut() {
                value.zeroize();
            }
        }
    }
}

// Counts serialized bytes so the real buffer can be sized exactly.
struct ByteCount(usize);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// NSID, service-relative path or absolute URL.
    pub endpoint: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Body.
    pub body: Body,
    /// Bearer token.
    pub bearer: Option<Secret>,
}

impl Request {
    /// A GET request.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    /// A POST request.
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: Body::Empty,
            bearer: None,
        }
    }

    /// Add a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Set a JSON body that carries credentials.
    ///
    /// The document is written into a buffer of exactly its length, so no
    /// partial copy is left behind by a reallocation, and kept as a
    /// [`Secret`].
    pub fn sealed_json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        let mut count = ByteCount(0);
        serde_json::to_writer(&mut count, value)?;
        let mut buffer = Vec::with_capacity(count.0);
        serde_json::to_writer(&mut buffer, value)?;
        let document = String::from_utf8(buffer)
            .map_err(|e| serde_json::Error::io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.body = Body::SealedJson(Secret::new(document));
        Ok(self)
    }

    /// Set a form body.
    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Attach a bearer token, replacing any previous one.
    pub fn bearer(mut self, token: Secret) -> Self {
        self.bearer = Some(token);
        self
    }

    /// First query value named `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First form value named `name`.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            Body::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl Response {
    /// A response carrying a JSON body.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string().into_bytes(),
        }
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the JSON body.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// Transport trait for sending remote calls.
///
/// Implementations handle the underlying connection mechanism
/// (HTTP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response, whatever its status.
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}
