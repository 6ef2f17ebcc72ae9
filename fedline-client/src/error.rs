//! Client errors.

use thiserror::Error;

use fedline_core::ErrorClass;
use fedline_store::StoreError;

use crate::classify::{classify, FailureClass};
use crate::transport::TransportError;

/// Errors surfaced by the session manager and timeline synchronizer.
///
/// Cloneable so coalesced callers can all receive the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Network failure worth retrying later.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The device is offline.
    #[error("no network connectivity: {0}")]
    NoConnectivity(String),

    /// The request cannot succeed as sent.
    #[error("request failed: {0}")]
    Fatal(String),

    /// Handle or password rejected.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The authorization callback does not match a pending request.
    #[error("authorization state mismatch")]
    StateMismatch,

    /// The user or server declined the authorization.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The session was rejected and has been signed out.
    #[error("session expired")]
    SessionExpired,

    /// No session.
    #[error("not signed in")]
    NotSignedIn,

    /// Local cache failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The shared operation ended without producing a result.
    #[error("operation abandoned")]
    Abandoned,
}

impl ClientError {
    /// Map a transport failure through the classifier.
    pub fn from_transport(error: &TransportError) -> Self {
        let detail = error.to_string();
        match classify(error) {
            FailureClass::Transient => Self::Transient(detail),
            FailureClass::NoConnectivity => Self::NoConnectivity(detail),
            FailureClass::Fatal => Self::Fatal(detail),
        }
    }

    /// Status class for timeline errors.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) | Self::Abandoned => ErrorClass::Transient,
            Self::NoConnectivity(_) => ErrorClass::NoConnectivity,
            Self::Fatal(_)
            | Self::InvalidCredentials
            | Self::StateMismatch
            | Self::AuthorizationDenied(_) => ErrorClass::Fatal,
            Self::SessionExpired => ErrorClass::SessionExpired,
            Self::NotSignedIn => ErrorClass::NotSignedIn,
            Self::Storage(_) => ErrorClass::Storage,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        Self::from_transport(&error)
    }
}

impl From<StoreError> for ClientError {
    fn from(error: StoreError) -> Self {
        Self::Storage(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_follow_classifier() {
        assert!(matches!(
            ClientError::from(TransportError::Timeout),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from(TransportError::RoamingDisabled),
            ClientError::NoConnectivity(_)
        ));
        assert!(matches!(
            ClientError::from(TransportError::Malformed("x".into())),
            ClientError::Fatal(_)
        ));
    }

    #[test]
    fn classes() {
        assert_eq!(ClientError::Abandoned.class(), ErrorClass::Transient);
        assert_eq!(ClientError::SessionExpired.class(), ErrorClass::SessionExpired);
        assert_eq!(ClientError::NotSignedIn.class(), ErrorClass::NotSignedIn);
        assert_eq!(ClientError::StateMismatch.class(), ErrorClass::Fatal);
        assert_eq!(
            ClientError::Storage("disk".into()).class(),
            ErrorClass::Storage
        );
    }

    #[test]
    fn store_errors_become_storage() {
        let err = StoreError::Integrity {
            reason: "sentinel".into(),
        };
        assert!(matches!(ClientError::from(err), ClientError::Storage(_)));
    }
}
