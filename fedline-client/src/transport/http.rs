//! HTTP transport over reqwest.

use super::{Body, Method, Request, Response, Transport, TransportError};
use async_trait::async_trait;
use std::error::Error as _;
use std::io;
use std::time::Duration;

/// HTTP transport for a single service.
///
/// NSID endpoints go to `{service}/xrpc/{nsid}`, paths are joined to the
/// service URL and absolute URLs are sent as-is.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    service: String,
}

impl HttpTransport {
    /// Create a transport for `service` (e.g. `https://bsky.social`).
    pub fn new(service: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("fedline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        Ok(Self {
            client,
            service: service.trim_end_matches('/').to_string(),
        })
    }

    /// The service base URL.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.service, endpoint)
        } else {
            format!("{}/xrpc/{}", self.service, endpoint)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let url = self.url_for(&request.endpoint);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose());
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            // reqwest keeps its own copy of the bytes while sending.
            Body::SealedJson(document) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(document.expose().to_owned()),
            Body::Form(pairs) => builder.form(pairs),
        };

        tracing::trace!(endpoint = %request.endpoint, "sending request");
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(Response {
            status,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout;
    }
    match io_error_kind(&e) {
        Some(io::ErrorKind::ConnectionReset) | Some(io::ErrorKind::ConnectionAborted) => {
            return TransportError::ConnectionReset
        }
        Some(io::ErrorKind::TimedOut) => return TransportError::Timeout,
        Some(io::ErrorKind::NetworkUnreachable) => return TransportError::NoInternet,
        Some(io::ErrorKind::HostUnreachable) => {
            return TransportError::HostUnreachable(e.to_string())
        }
        _ => {}
    }
    if e.is_connect() {
        if is_dns_failure(&e) {
            TransportError::HostUnreachable(e.to_string())
        } else {
            TransportError::ConnectionFailed(e.to_string())
        }
    } else if e.is_body() || e.is_decode() {
        TransportError::Malformed(e.to_string())
    } else {
        TransportError::Protocol(e.to_string())
    }
}

fn io_error_kind(e: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Some(io.kind());
        }
        source = err.source();
    }
    None
}

// hyper-util reports resolver failures as "dns error" in the chain.
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if err.to_string().contains("dns error") {
            return true;
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new("https://pds.example/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn nsid_goes_to_xrpc() {
        assert_eq!(
            transport().url_for("app.bsky.feed.getTimeline"),
            "https://pds.example/xrpc/app.bsky.feed.getTimeline"
        );
    }

    #[test]
    fn path_is_service_relative() {
        assert_eq!(
            transport().url_for("/.well-known/oauth-authorization-server"),
            "https://pds.example/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn absolute_url_is_kept() {
        assert_eq!(
            transport().url_for("https://auth.example/oauth/token"),
            "https://auth.example/oauth/token"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Port 9 on loopback refuses connections.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let result = transport.send(Request::get("app.bsky.actor.getProfile")).await;
        assert!(result.is_err());
    }
}
