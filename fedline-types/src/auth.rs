//! OAuth authorization request types.

use serde::{Deserialize, Serialize};

/// `response_type` sent with every authorization request.
pub const RESPONSE_TYPE: &str = "code";

/// PKCE challenge method. Plain challenges are never sent.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// An OAuth authorization request as pushed to the authorization server.
///
/// Safe to hand to whatever opens the login page. The PKCE verifier and
/// the token endpoint never leave the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Registered client identifier.
    pub client_id: String,
    /// Where the authorization server sends the user back.
    pub redirect_uri: String,
    /// Requested scope.
    pub scope: String,
    /// Random anti-forgery value echoed back in the callback.
    pub state: String,
    /// base64url(sha256(verifier)).
    pub code_challenge: String,
    /// Always [`CODE_CHALLENGE_METHOD`].
    pub code_challenge_method: String,
    /// Always [`RESPONSE_TYPE`].
    pub response_type: String,
    /// Handle hint shown on the login page.
    #[serde(default)]
    pub login_hint: Option<String>,
}

impl AuthorizationRequest {
    /// Parameters sent to the pushed authorization request endpoint.
    pub fn to_form_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("response_type", self.response_type.clone()),
            ("client_id", self.client_id.clone()),
            ("redirect_uri", self.redirect_uri.clone()),
            ("scope", self.scope.clone()),
            ("state", self.state.clone()),
            ("code_challenge", self.code_challenge.clone()),
            ("code_challenge_method", self.code_challenge_method.clone()),
        ];
        if let Some(hint) = &self.login_hint {
            pairs.push(("login_hint", hint.clone()));
        }
        pairs
    }
}

/// The result of starting an OAuth login: the pending request and the URL
/// the user has to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthLaunch {
    /// The request waiting for its callback.
    pub request: AuthorizationRequest,
    /// Authorization URL to open in a browser.
    pub authorization_url: String,
}
