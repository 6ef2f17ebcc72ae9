//! PKCE (RFC 7636) verifier, challenge and state generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

use fedline_types::Secret;

/// Random bytes behind a verifier or state value (43 base64url characters).
const RANDOM_BYTES: usize = 32;

/// Errors from PKCE generation.
#[derive(Debug, Error)]
pub enum PkceError {
    /// The OS random source failed.
    #[error("random source unavailable: {0}")]
    Random(getrandom::Error),
}

/// A code verifier with its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Sent only with the token exchange.
    pub verifier: Secret,
    /// base64url(sha256(verifier)), sent with the authorization request.
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier and its challenge.
    pub fn generate() -> Result<Self, PkceError> {
        let verifier = random_token()?;
        let challenge = challenge_for(&verifier);
        Ok(Self {
            verifier: Secret::new(verifier),
            challenge,
        })
    }

    /// Build a pair from a known verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = challenge_for(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }
}

/// Generate a random anti-forgery `state` value.
pub fn generate_state() -> Result<String, PkceError> {
    random_token()
}

fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_token() -> Result<String, PkceError> {
    let mut bytes = [0u8; RANDOM_BYTES];
    getrandom::getrandom(&mut bytes).map_err(PkceError::Random)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
