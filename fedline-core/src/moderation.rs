//! Muted-word filtering.
//!
//! Applied to the projection only; muted content stays in the cache.
//! Rules whose expiry has passed are skipped, not deleted.

use fedline_types::{MutedWordActorTarget, MutedWordPreference, MutedWordTarget, Post};

#[derive(Debug, Clone)]
struct Rule {
    /// Lower-cased value without a leading `#`.
    needle: String,
    /// True for values that are more than one word.
    phrase: bool,
    content: bool,
    tag: bool,
    exclude_following: bool,
}

/// Compiled set of active muted-word rules.
#[derive(Debug, Clone, Default)]
pub struct MuteFilter {
    rules: Vec<Rule>,
}

impl MuteFilter {
    /// Compile the rules active at `now_ms`.
    pub fn new<'a>(rules: impl IntoIterator<Item = &'a MutedWordPreference>, now_ms: i64) -> Self {
        let rules = rules
            .into_iter()
            .filter(|r| r.is_active(now_ms))
            .filter_map(|r| {
                let needle = r.value.trim().trim_start_matches('#').to_lowercase();
                if needle.is_empty() {
                    return None;
                }
                Some(Rule {
                    phrase: needle.chars().any(|c| !is_word_char(c)),
                    needle,
                    content: r.targets.contains(&MutedWordTarget::Content),
                    tag: r.targets.contains(&MutedWordTarget::Tag),
                    exclude_following: r.actor_target
                        == Some(MutedWordActorTarget::ExcludeFollowing),
                })
            })
            .collect();
        Self { rules }
    }

    /// Check if the filter has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check if `post` should be hidden.
    ///
    /// `author_followed` is whether the viewer follows the post's author.
    pub fn is_muted(&self, post: &Post, author_followed: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let text = post.text.to_lowercase();
        let words: Vec<&str> = text.split(|c: char| !is_word_char(c)).collect();

        self.rules.iter().any(|rule| {
            if rule.exclude_following && author_followed {
                return false;
            }
            let in_content = rule.content
                && if rule.phrase {
                    text.contains(&rule.needle)
                } else {
                    words.iter().any(|w| *w == rule.needle)
                };
            let in_tags = rule.tag
                && post
                    .tags
                    .iter()
                    .any(|t| t.trim_start_matches('#').to_lowercase() == rule.needle);
            in_content || in_tags
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
