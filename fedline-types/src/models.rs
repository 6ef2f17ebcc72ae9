//! Cached entities and feed page payloads.
//!
//! Field names serialize in camelCase, matching the feed endpoint payloads.
//! Timestamps are unix milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ContentId, Cursor, Did, Handle};

/// A remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Stable identifier.
    pub did: Did,
    /// Current handle.
    pub handle: Handle,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Bio.
    #[serde(default)]
    pub description: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Number of followers.
    #[serde(default)]
    pub followers_count: i64,
    /// Number of accounts followed.
    #[serde(default)]
    pub follows_count: i64,
    /// Number of posts.
    #[serde(default)]
    pub posts_count: i64,
    /// Whether the viewer follows this account.
    #[serde(default)]
    pub viewer_following: bool,
    /// When the server last indexed the profile.
    #[serde(default)]
    pub indexed_at: Option<i64>,
    /// When the account was created.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl Profile {
    /// A profile with only identity fields set.
    pub fn new(did: Did, handle: Handle) -> Self {
        Self {
            did,
            handle,
            display_name: None,
            description: None,
            avatar: None,
            followers_count: 0,
            follows_count: 0,
            posts_count: 0,
            viewer_following: false,
            indexed_at: None,
            created_at: None,
        }
    }

    /// The placeholder profile row.
    pub fn unknown() -> Self {
        Self::new(Did::unknown(), Handle::default())
    }

    /// Check if this is the placeholder profile.
    pub fn is_unknown(&self) -> bool {
        self.did.is_unknown()
    }
}

/// Author reference embedded in a feed post.
///
/// Feed payloads may carry a partial profile or just the author's did. Only
/// a reference with a handle is treated as profile data, and only the fields
/// it carries are merged into the cached profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRef {
    /// Author did.
    pub did: Did,
    /// Handle, absent when the server could not resolve the author.
    #[serde(default)]
    pub handle: Option<Handle>,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether the viewer follows the author, when the view says.
    #[serde(default)]
    pub viewer_following: Option<bool>,
}

impl ProfileRef {
    /// Check if the reference carries profile data.
    pub fn has_profile(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_empty())
    }
}

/// A post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Stable content identifier.
    pub uri: ContentId,
    /// Content hash of the record version.
    #[serde(default)]
    pub cid: Option<String>,
    /// Did of the author as claimed by the record.
    pub author: Did,
    /// Post text.
    pub text: String,
    /// Hashtags, without the leading `#`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared languages.
    #[serde(default)]
    pub langs: Vec<String>,
    /// Number of replies.
    #[serde(default)]
    pub reply_count: i64,
    /// Number of reposts.
    #[serde(default)]
    pub repost_count: i64,
    /// Number of likes.
    #[serde(default)]
    pub like_count: i64,
    /// Creation time.
    pub created_at: i64,
    /// When the server indexed the post.
    #[serde(default)]
    pub indexed_at: Option<i64>,
}

/// A post as the server renders it, with an embedded author reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    /// Stable content identifier.
    pub uri: ContentId,
    /// Content hash of the record version.
    #[serde(default)]
    pub cid: Option<String>,
    /// Author reference.
    pub author: ProfileRef,
    /// Post text.
    pub text: String,
    /// Hashtags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared languages.
    #[serde(default)]
    pub langs: Vec<String>,
    /// Number of replies.
    #[serde(default)]
    pub reply_count: i64,
    /// Number of reposts.
    #[serde(default)]
    pub repost_count: i64,
    /// Number of likes.
    #[serde(default)]
    pub like_count: i64,
    /// Creation time.
    pub created_at: i64,
    /// When the server indexed the post.
    #[serde(default)]
    pub indexed_at: Option<i64>,
}

impl PostView {
    /// The post row for this view.
    pub fn to_post(&self) -> Post {
        Post {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
            author: self.author.did.clone(),
            text: self.text.clone(),
            tags: self
                .tags
                .iter()
                .map(|t| t.trim_start_matches('#').to_string())
                .collect(),
            langs: self.langs.clone(),
            reply_count: self.reply_count,
            repost_count: self.repost_count,
            like_count: self.like_count,
            created_at: self.created_at,
            indexed_at: self.indexed_at,
        }
    }
}

/// One entry of a feed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    /// The post.
    pub post: PostView,
}

/// One page of a cursor-paginated feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedPage {
    /// Posts in server order.
    #[serde(default)]
    pub feed: Vec<FeedPost>,
    /// Cursor for the next page, absent at the end of the feed.
    #[serde(default)]
    pub cursor: Option<Cursor>,
}

/// What a list is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPurpose {
    /// A curated feed of accounts.
    Curate,
    /// A moderation (mute/block) list.
    Moderate,
    /// A reference list.
    Reference,
}

impl ListPurpose {
    /// Storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Curate => "curate",
            Self::Moderate => "moderate",
            Self::Reference => "reference",
        }
    }

    /// Parse the storage form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "curate" => Some(Self::Curate),
            "moderate" => Some(Self::Moderate),
            "reference" => Some(Self::Reference),
            _ => None,
        }
    }
}

/// A list owned by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    /// Stable content identifier.
    pub uri: ContentId,
    /// Owning profile.
    pub owner: Did,
    /// Name.
    pub name: String,
    /// Purpose.
    pub purpose: ListPurpose,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Creation time.
    pub created_at: i64,
}

/// A message sent by a profile, optionally filed into lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable content identifier.
    pub id: ContentId,
    /// Sending profile.
    pub sender: Did,
    /// Message text.
    pub text: String,
    /// When it was sent.
    pub sent_at: i64,
}

/// Where a muted word is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutedWordTarget {
    /// Post text.
    Content,
    /// Post hashtags.
    Tag,
}

/// Whose posts a muted word applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutedWordActorTarget {
    /// Everyone.
    All,
    /// Everyone except accounts the viewer follows.
    ExcludeFollowing,
}

/// A muted-word rule owned by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutedWordPreference {
    /// Rule identifier.
    pub id: String,
    /// Profile the rule belongs to.
    pub owner: Did,
    /// The muted word or phrase.
    pub value: String,
    /// Where to match.
    pub targets: BTreeSet<MutedWordTarget>,
    /// Whose posts to match; `None` means everyone.
    #[serde(default)]
    pub actor_target: Option<MutedWordActorTarget>,
    /// When the rule stops applying; `None` never expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl MutedWordPreference {
    /// A new rule with a fresh identifier.
    pub fn new(
        owner: Did,
        value: impl Into<String>,
        targets: impl IntoIterator<Item = MutedWordTarget>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            value: value.into(),
            targets: targets.into_iter().collect(),
            actor_target: None,
            expires_at: None,
        }
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the actor target.
    pub fn with_actor_target(mut self, target: MutedWordActorTarget) -> Self {
        self.actor_target = Some(target);
        self
    }

    /// Check if the rule applies at `now_ms`.
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |expires| expires > now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did(s: &str) -> Did {
        Did::parse(s).unwrap()
    }

    #[test]
    fn unknown_profile_has_empty_fields() {
        let p = Profile::unknown();
        assert!(p.is_unknown());
        assert!(p.handle.is_empty());
        assert!(p.display_name.is_none());
    }

    #[test]
    fn profile_ref_without_handle_is_not_profile_data() {
        let r = ProfileRef {
            did: did("did:plc:x"),
            handle: None,
            display_name: Some("X".into()),
            avatar: None,
            viewer_following: None,
        };
        assert!(!r.has_profile());

        let r = ProfileRef {
            handle: Some(Handle::new("")),
            ..r
        };
        assert!(!r.has_profile());

        let r = ProfileRef {
            handle: Some(Handle::new("x.example")),
            ..r
        };
        assert!(r.has_profile());
    }

    #[test]
    fn profile_ref_tells_absent_follow_state_apart() {
        let absent: ProfileRef =
            serde_json::from_str(r#"{"did": "did:plc:x", "handle": "x.example"}"#).unwrap();
        assert_eq!(absent.viewer_following, None);

        let following: ProfileRef = serde_json::from_str(
            r#"{"did": "did:plc:x", "handle": "x.example", "viewerFollowing": true}"#,
        )
        .unwrap();
        assert_eq!(following.viewer_following, Some(true));
    }

    #[test]
    fn feed_page_parses_from_json() {
        let json = r##"{
            "feed": [
                {"post": {"uri": "at://p/1", "author": {"did": "did:plc:a", "handle": "a.example"},
                 "text": "hello #rust", "tags": ["#rust"], "createdAt": 1000}},
                {"post": {"uri": "at://p/2", "author": {"did": "did:plc:b"},
                 "text": "bye", "createdAt": 900}}
            ],
            "cursor": "c1"
        }"##;
        let page: FeedPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.feed.len(), 2);
        assert_eq!(page.cursor, Some(Cursor::new("c1")));
        assert_eq!(page.feed[0].post.to_post().tags, vec!["rust".to_string()]);
        assert!(page.feed[0].post.author.has_profile());
        assert!(!page.feed[1].post.author.has_profile());
    }

    #[test]
    fn feed_page_without_cursor_is_end_of_feed() {
        let page: FeedPage = serde_json::from_str(r#"{"feed": []}"#).unwrap();
        assert!(page.cursor.is_none());
    }

    #[test]
    fn muted_word_expiry() {
        let rule = MutedWordPreference::new(did("did:plc:me"), "spoiler", [MutedWordTarget::Content]);
        assert!(rule.is_active(i64::MAX));

        let rule = rule.with_expiry(5_000);
        assert!(rule.is_active(4_999));
        assert!(!rule.is_active(5_000));
    }

    #[test]
    fn muted_word_ids_are_unique() {
        let a = MutedWordPreference::new(did("did:plc:me"), "a", [MutedWordTarget::Tag]);
        let b = MutedWordPreference::new(did("did:plc:me"), "a", [MutedWordTarget::Tag]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn list_purpose_storage_form() {
        for purpose in [ListPurpose::Curate, ListPurpose::Moderate, ListPurpose::Reference] {
            assert_eq!(ListPurpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(ListPurpose::parse("other"), None);
    }
}
