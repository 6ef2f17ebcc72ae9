//! Mock transport for testing.
//!
//! Allows queueing replies per endpoint and capturing sent requests for verification.

use super::{Request, Response, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock transport for testing.
///
/// Replies are queued per endpoint and consumed in order. A request to an
/// endpoint with nothing queued fails with a protocol error, which is never
/// retried.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    replies: HashMap<String, VecDeque<Result<Response, TransportError>>>,
    sent_requests: Vec<Request>,
    latency: Option<Duration>,
    fail_next_send: Option<TransportError>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for the next request to `endpoint`.
    pub fn queue_response(&self, endpoint: &str, response: Response) {
        self.lock()
            .replies
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue a JSON response for the next request to `endpoint`.
    pub fn queue_json(&self, endpoint: &str, status: u16, body: serde_json::Value) {
        self.queue_response(endpoint, Response::json(status, &body));
    }

    /// Queue a transport failure for the next request to `endpoint`.
    pub fn queue_error(&self, endpoint: &str, error: TransportError) {
        self.lock()
            .replies
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Cause the next send() to fail with the given error, whatever the endpoint.
    pub fn fail_next_send(&self, error: TransportError) {
        self.lock().fail_next_send = Some(error);
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Get all requests that were sent.
    pub fn sent_requests(&self) -> Vec<Request> {
        self.lock().sent_requests.clone()
    }

    /// Requests that were sent to `endpoint`.
    pub fn requests_to(&self, endpoint: &str) -> Vec<Request> {
        self.lock()
            .sent_requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Get the last request that was sent.
    pub fn last_sent(&self) -> Option<Request> {
        self.lock().sent_requests.last().cloned()
    }

    /// Number of replies still queued across all endpoints.
    pub fn pending_replies(&self) -> usize {
        self.lock().replies.values().map(VecDeque::len).sum()
    }

    /// Clear all state (requests, queues, latency).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let (reply, latency) = {
            let mut inner = self.lock();
            let endpoint = request.endpoint.clone();
            inner.sent_requests.push(request);

            let reply = match inner.fail_next_send.take() {
                Some(error) => Err(error),
                None => inner
                    .replies
                    .get_mut(&endpoint)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| {
                        Err(TransportError::Protocol(format!(
                            "no reply queued for {endpoint}"
                        )))
                    }),
            };
            (reply, inner.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        reply
    }
}
