//! Record codecs.
//!
//! Two interchangeable encodings:
//! - [`Encoding::Compact`]: MessagePack with named fields. Used for every
//!   durable record. Unknown fields are ignored on decode and fields marked
//!   `#[serde(default)]` may be absent, so adding optional fields never breaks
//!   records written by an older build.
//! - [`Encoding::Schemaless`]: JSON. Used for fixtures and snapshots that cross
//!   process boundaries.

use serde::{de::DeserializeOwned, Serialize};

use crate::CodecError;

/// Which codec to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// MessagePack with field names (durable state).
    #[default]
    Compact,
    /// JSON (fixtures, snapshots).
    Schemaless,
}

/// Encode a record.
pub fn encode<T: Serialize>(encoding: Encoding, value: &T) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Compact => rmp_serde::to_vec_named(value).map_err(CodecError::CompactEncode),
        Encoding::Schemaless => serde_json::to_vec(value).map_err(CodecError::Schemaless),
    }
}

/// Decode a record.
pub fn decode<T: DeserializeOwned>(encoding: Encoding, bytes: &[u8]) -> Result<T, CodecError> {
    match encoding {
        Encoding::Compact => rmp_serde::from_slice(bytes).map_err(CodecError::CompactDecode),
        Encoding::Schemaless => serde_json::from_slice(bytes).map_err(CodecError::Schemaless),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Did, Handle, Secret, Session, SessionTokens};
    use serde::Deserialize;

    fn credentials_session() -> Session {
        Session::Credentials {
            handle: Handle::new("alice.example"),
            did: Did::parse("did:plc:alice").unwrap(),
            tokens: SessionTokens {
                access: Secret::new("a"),
                refresh: Secret::new("r"),
                expires_at: 1_700_000_000_000,
            },
        }
    }

    fn oauth_session() -> Session {
        Session::OAuth {
            handle: Handle::new("bob.example"),
            did: Did::parse("did:plc:bob").unwrap(),
            issuer: "https://auth.example".into(),
            token_endpoint: "https://auth.example/token".into(),
            tokens: SessionTokens {
                access: Secret::new("a2"),
                refresh: Secret::new("r2"),
                expires_at: 42,
            },
        }
    }

    #[test]
    fn both_session_variants_survive_both_encodings() {
        for session in [credentials_session(), oauth_session()] {
            for encoding in [Encoding::Compact, Encoding::Schemaless] {
                let bytes = encode(encoding, &session).unwrap();
                let decoded: Session = decode(encoding, &bytes).unwrap();
                assert_eq!(decoded, session);
                assert_eq!(decoded.kind(), session.kind());
            }
        }
    }

    #[test]
    fn compact_is_smaller_than_schemaless() {
        let session = oauth_session();
        let compact = encode(Encoding::Compact, &session).unwrap();
        let json = encode(Encoding::Schemaless, &session).unwrap();
        assert!(compact.len() < json.len());
    }

    // ===========================================
    // Schema Evolution Tests
    // ===========================================

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct MetaV1 {
        generation: u64,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct MetaV2 {
        generation: u64,
        #[serde(default)]
        refreshed_at: Option<i64>,
    }

    #[test]
    fn compact_decodes_older_records_with_new_optional_field() {
        let old = encode(Encoding::Compact, &MetaV1 { generation: 7 }).unwrap();
        let decoded: MetaV2 = decode(Encoding::Compact, &old).unwrap();
        assert_eq!(
            decoded,
            MetaV2 {
                generation: 7,
                refreshed_at: None
            }
        );
    }

    #[test]
    fn compact_ignores_fields_it_does_not_know() {
        let newer = encode(
            Encoding::Compact,
            &MetaV2 {
                generation: 3,
                refreshed_at: Some(10),
            },
        )
        .unwrap();
        let decoded: MetaV1 = decode(Encoding::Compact, &newer).unwrap();
        assert_eq!(decoded, MetaV1 { generation: 3 });
    }

    #[test]
    fn decode_garbage_fails() {
        let result: Result<Session, _> = decode(Encoding::Compact, &[0xc1, 0x00]);
        assert!(matches!(result, Err(CodecError::CompactDecode(_))));
        let result: Result<Session, _> = decode(Encoding::Schemaless, b"{not json");
        assert!(matches!(result, Err(CodecError::Schemaless(_))));
    }
}
