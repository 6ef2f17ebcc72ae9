//! Network error classification.
//!
//! Maps a raw [`TransportError`] to the retry decision it implies. Session
//! rejection is a separate question answered by [`is_session_rejection`];
//! the session manager layers it above the class.

use crate::transport::TransportError;

/// What a failed call means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Likely to succeed if tried again.
    Transient,
    /// The device is offline. Retried like `Transient`, reported apart.
    NoConnectivity,
    /// Trying again will not help.
    Fatal,
}

impl FailureClass {
    /// Check if a retry may help.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::NoConnectivity)
    }
}

/// Classify a transport failure.
pub fn classify(error: &TransportError) -> FailureClass {
    match error {
        TransportError::Timeout
        | TransportError::ConnectionReset
        | TransportError::ConnectionFailed(_)
        | TransportError::HostUnreachable(_) => FailureClass::Transient,
        TransportError::NoInternet | TransportError::RoamingDisabled => {
            FailureClass::NoConnectivity
        }
        TransportError::Malformed(_) | TransportError::Protocol(_) => FailureClass::Fatal,
        TransportError::Status { status, .. } => classify_status(*status),
    }
}

fn classify_status(status: u16) -> FailureClass {
    match status {
        408 | 429 => FailureClass::Transient,
        500..=599 => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

/// Check if the server rejected the credentials a call carried.
///
/// A 401, or a 400 whose error code is `ExpiredToken`, `InvalidToken` or
/// `invalid_grant`.
pub fn is_session_rejection(error: &TransportError) -> bool {
    match error {
        TransportError::Status { status: 401, .. } => true,
        TransportError::Status {
            status: 400,
            error: Some(code),
            ..
        } => matches!(code.as_str(), "ExpiredToken" | "InvalidToken" | "invalid_grant"),
        _ => false,
    }
}
