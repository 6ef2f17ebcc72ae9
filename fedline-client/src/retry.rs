//! Timed, retried remote calls.

use std::time::Duration;

use fedline_core::RetryPolicy;

use crate::classify::classify;
use crate::transport::{Request, Response, Transport, TransportError};

/// Send `request`, bounding each attempt by `timeout` and retrying
/// retryable failures with backoff.
///
/// Non-2xx responses come back as [`TransportError::Status`].
pub async fn send_with_retry<T: Transport + ?Sized>(
    transport: &T,
    request: &Request,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<Response, TransportError> {
    let mut attempt = 0;
    loop {
        let error = match tokio::time::timeout(timeout, transport.send(request.clone())).await {
            Ok(Ok(response)) if response.is_success() => return Ok(response),
            Ok(Ok(response)) => TransportError::from_response(&response),
            Ok(Err(e)) => e,
            Err(_) => TransportError::Timeout,
        };
        if !classify(&error).is_retryable() || !policy.should_retry(attempt) {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(
            endpoint = %request.endpoint,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying request"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
