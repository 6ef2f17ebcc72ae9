//! Authenticated session variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Did, Handle};

/// A password or token. Zeroed on drop, never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret. Keep the borrow short-lived.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// Intentionally opaque debug to avoid logging secrets
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

/// Token pair issued for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    /// Bearer token attached to authenticated calls.
    pub access: Secret,
    /// Token exchanged for a fresh pair.
    pub refresh: Secret,
    /// When the access token stops being accepted (unix millis).
    pub expires_at: i64,
}

impl SessionTokens {
    /// Check if the access token expires within `margin_ms` of `now_ms`.
    pub fn expires_within(&self, now_ms: i64, margin_ms: i64) -> bool {
        self.expires_at.saturating_sub(margin_ms) <= now_ms
    }
}

/// Which login method produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Handle + password exchange.
    Credentials,
    /// OAuth authorization code flow with PKCE.
    OAuth,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials => f.write_str("credentials"),
            Self::OAuth => f.write_str("oauth"),
        }
    }
}

/// The authenticated session, discriminated by how it was obtained.
///
/// A credential session keeps no password: the password is dropped once it
/// has been exchanged for tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Session {
    /// Session created from a handle/password exchange.
    #[serde(rename = "credentials")]
    Credentials {
        /// Account handle.
        handle: Handle,
        /// Account did.
        did: Did,
        /// Current token pair.
        tokens: SessionTokens,
    },
    /// Session created through the OAuth authorization code flow.
    #[serde(rename = "oauth")]
    OAuth {
        /// Account handle.
        handle: Handle,
        /// Account did.
        did: Did,
        /// Authorization server issuer.
        issuer: String,
        /// Where refresh grants are sent.
        token_endpoint: String,
        /// Current token pair.
        tokens: SessionTokens,
    },
}

impl Session {
    /// The login method of this session.
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::Credentials { .. } => SessionKind::Credentials,
            Self::OAuth { .. } => SessionKind::OAuth,
        }
    }

    /// Account handle.
    pub fn handle(&self) -> &Handle {
        match self {
            Self::Credentials { handle, .. } | Self::OAuth { handle, .. } => handle,
        }
    }

    /// Account did.
    pub fn did(&self) -> &Did {
        match self {
            Self::Credentials { did, .. } | Self::OAuth { did, .. } => did,
        }
    }

    /// Current token pair.
    pub fn tokens(&self) -> &SessionTokens {
        match self {
            Self::Credentials { tokens, .. } | Self::OAuth { tokens, .. } => tokens,
        }
    }

    /// Replace the token pair, keeping everything else.
    pub fn with_tokens(mut self, new_tokens: SessionTokens) -> Self {
        match &mut self {
            Self::Credentials { tokens, .. } | Self::OAuth { tokens, .. } => *tokens = new_tokens,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SessionTokens {
        SessionTokens {
            access: Secret::new("access-jwt"),
            refresh: Secret::new("refresh-jwt"),
            expires_at: 10_000,
        }
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "Secret([REDACTED])");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn session_debug_never_shows_tokens() {
        let session = Session::Credentials {
            handle: Handle::new("alice.example"),
            did: Did::parse("did:plc:alice").unwrap(),
            tokens: tokens(),
        };
        let debug = format!("{:?}", session);
        assert!(!debug.contains("access-jwt"));
        assert!(!debug.contains("refresh-jwt"));
    }

    #[test]
    fn expires_within_margin() {
        let t = tokens();
        assert!(!t.expires_within(1_000, 5_000));
        assert!(t.expires_within(5_000, 5_000));
        assert!(t.expires_within(12_000, 0));
    }

    #[test]
    fn accessors_cover_both_variants() {
        let did = Did::parse("did:plc:bob").unwrap();
        let session = Session::OAuth {
            handle: Handle::new("bob.example"),
            did: did.clone(),
            issuer: "https://auth.example".into(),
            token_endpoint: "https://auth.example/oauth/token".into(),
            tokens: tokens(),
        };
        assert_eq!(session.kind(), SessionKind::OAuth);
        assert_eq!(session.did(), &did);
        assert_eq!(session.handle().as_str(), "bob.example");
    }

    #[test]
    fn with_tokens_replaces_only_tokens() {
        let session = Session::Credentials {
            handle: Handle::new("alice.example"),
            did: Did::parse("did:plc:alice").unwrap(),
            tokens: tokens(),
        };
        let fresh = SessionTokens {
            access: Secret::new("new-access"),
            refresh: Secret::new("new-refresh"),
            expires_at: 99,
        };
        let updated = session.clone().with_tokens(fresh.clone());
        assert_eq!(updated.tokens(), &fresh);
        assert_eq!(updated.did(), session.did());
        assert_eq!(updated.kind(), SessionKind::Credentials);
    }

    #[test]
    fn session_json_is_tagged_by_kind() {
        let session = Session::Credentials {
            handle: Handle::new("alice.example"),
            did: Did::parse("did:plc:alice").unwrap(),
            tokens: tokens(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["kind"], "credentials");
    }
}
