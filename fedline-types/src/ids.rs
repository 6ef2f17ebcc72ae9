//! Identity and paging types for fedline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::IdError;

/// Fixed did of the placeholder profile row.
///
/// Content whose author has not been hydrated yet points at this row so
/// that author references never dangle.
pub const UNKNOWN_PROFILE_DID: &str = "did:fedline:unknown";

/// A decentralized identifier, the stable key of a remote identity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Parse a did, rejecting anything without the `did:<method>:` shape.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(value))
            }
            _ => Err(IdError::InvalidDid(value)),
        }
    }

    /// The did of the placeholder profile.
    pub fn unknown() -> Self {
        Self(UNKNOWN_PROFILE_DID.to_string())
    }

    /// Check if this is the placeholder did.
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_PROFILE_DID
    }

    /// Get the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Did {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

/// A user-facing handle, normalized to lower case without a leading `@`.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    /// Normalize a handle without validating it.
    ///
    /// Used for values coming back from the server or the cache, where an
    /// empty handle (the placeholder profile) is legitimate.
    pub fn new(value: impl AsRef<str>) -> Self {
        let trimmed = value.as_ref().trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        Self(trimmed.to_ascii_lowercase())
    }

    /// Normalize and validate a handle typed by a user.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, IdError> {
        let handle = Self::new(value.as_ref());
        let valid = !handle.0.is_empty()
            && handle.0.contains('.')
            && !handle.0.starts_with('.')
            && !handle.0.ends_with('.')
            && handle
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if valid {
            Ok(handle)
        } else {
            Err(IdError::InvalidHandle(value.as_ref().to_string()))
        }
    }

    /// Get the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the handle is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Handle {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Stable identifier of a content record (post, list or message).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wrap an identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

/// An opaque pagination token handed out by the feed endpoint.
///
/// The client never interprets it; it is only echoed back to fetch the
/// page that follows.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// Identifies one timeline and therefore one remote feed query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimelineKey {
    /// The viewer's home timeline.
    Following,
    /// A custom feed generator.
    Feed(ContentId),
    /// A list feed.
    List(ContentId),
    /// Posts by a single author.
    Author(Did),
}

impl TimelineKey {
    /// Stable string used as the storage key.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Following => "following".to_string(),
            Self::Feed(uri) => format!("feed:{}", uri),
            Self::List(uri) => format!("list:{}", uri),
            Self::Author(did) => format!("author:{}", did),
        }
    }

    /// Parse a storage key produced by [`TimelineKey::storage_key`].
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if value == "following" {
            return Ok(Self::Following);
        }
        match value.split_once(':') {
            Some(("feed", uri)) if !uri.is_empty() => Ok(Self::Feed(ContentId::new(uri))),
            Some(("list", uri)) if !uri.is_empty() => Ok(Self::List(ContentId::new(uri))),
            Some(("author", did)) => Did::parse(did)
                .map(Self::Author)
                .map_err(|_| IdError::InvalidTimelineKey(value.to_string())),
            _ => Err(IdError::InvalidTimelineKey(value.to_string())),
        }
    }
}

impl TryFrom<String> for TimelineKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimelineKey> for String {
    fn from(key: TimelineKey) -> Self {
        key.storage_key()
    }
}

impl fmt::Display for TimelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
