//! Error types for fedline-types.

use thiserror::Error;

/// Errors raised while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// MessagePack serialization failed
    #[error("compact encoding failed: {0}")]
    CompactEncode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("compact decoding failed: {0}")]
    CompactDecode(#[source] rmp_serde::decode::Error),

    /// JSON serialization or deserialization failed
    #[error("schemaless codec failed: {0}")]
    Schemaless(#[source] serde_json::Error),
}

/// Errors raised when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Not a `did:` identifier
    #[error("invalid did: {0}")]
    InvalidDid(String),

    /// Handle is empty or not a domain name
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Unknown timeline key form
    #[error("invalid timeline key: {0}")]
    InvalidTimelineKey(String),
}
