//! Remote endpoints and their payloads.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use fedline_types::{Cursor, Did, Profile, TimelineKey};

use crate::transport::Request;

/// Exchange handle and password for tokens.
pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
/// Exchange a refresh token for a new pair.
pub const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";
/// Resolve a handle to a did.
pub const RESOLVE_HANDLE: &str = "com.atproto.identity.resolveHandle";
/// Authorization server metadata document.
pub const AUTH_SERVER_METADATA: &str = "/.well-known/oauth-authorization-server";
/// Home timeline.
pub const GET_TIMELINE: &str = "app.bsky.feed.getTimeline";
/// Custom feed.
pub const GET_FEED: &str = "app.bsky.feed.getFeed";
/// List feed.
pub const GET_LIST_FEED: &str = "app.bsky.feed.getListFeed";
/// Author feed.
pub const GET_AUTHOR_FEED: &str = "app.bsky.feed.getAuthorFeed";
/// Batch profile lookup.
pub const GET_PROFILES: &str = "app.bsky.actor.getProfiles";

/// `createSession` request. Borrows the password; sent as a sealed body.
#[derive(Serialize)]
pub struct CreateSessionBody<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

/// `createSession` / `refreshSession` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

/// `resolveHandle` response.
#[derive(Debug, Deserialize)]
pub struct ResolveHandleResponse {
    pub did: String,
}

/// Authorization server metadata (RFC 8414), the fields we use.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub pushed_authorization_request_endpoint: String,
}

/// Pushed authorization request response.
#[derive(Debug, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// OAuth token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub sub: String,
}

/// `getProfiles` response.
#[derive(Debug, Deserialize)]
pub struct ProfilesResponse {
    pub profiles: Vec<Profile>,
}

/// Feed request for a timeline key.
pub fn feed_request(key: &TimelineKey, cursor: Option<&Cursor>, limit: u32) -> Request {
    let request = match key {
        TimelineKey::Following => Request::get(GET_TIMELINE),
        TimelineKey::Feed(uri) => Request::get(GET_FEED).query("feed", uri.as_str()),
        TimelineKey::List(uri) => Request::get(GET_LIST_FEED).query("list", uri.as_str()),
        TimelineKey::Author(did) => Request::get(GET_AUTHOR_FEED).query("actor", did.as_str()),
    };
    let request = request.query("limit", limit.to_string());
    match cursor {
        Some(cursor) => request.query("cursor", cursor.as_str()),
        None => request,
    }
}

/// Profile lookup for a batch of dids.
pub fn profiles_request(dids: &[Did]) -> Request {
    dids.iter()
        .fold(Request::get(GET_PROFILES), |r, did| r.query("actors", did.as_str()))
}

/// Expiry of a JWT access token, in unix millis, from its `exp` claim.
///
/// The signature is not checked; the token is only read to schedule refresh.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp.map(|secs| secs.saturating_mul(1000))
}

#[cfg(test)]
pub(crate) fn test_jwt(exp_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256K","typ":"at+jwt"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"did:plc:alice","exp":{exp_secs}}}"#));
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
