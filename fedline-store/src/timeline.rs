//! Timeline windows.
//!
//! A window is stored as one `timelines` row holding compact
//! [`TimelineMeta`] (tile cursors, generation) plus one `timeline_entries`
//! row per item. Entries reference posts, so a deleted post drops out of
//! every window without touching the metadata.

use serde::{Deserialize, Serialize};

use fedline_core::{Tile, TimelineWindow};
use fedline_types::{
    decode, encode, ContentId, Cursor, Encoding, Post, Profile, ProfileRef, TimelineKey,
};

use crate::content::{upsert_post_tx, PostRow};
use crate::error::{StoreError, StoreResult};
use crate::profiles::merge_author_tx;
use crate::store::{LocalStore, StoreChange};

/// Durable per-timeline metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimelineMeta {
    /// Cursor of each tile, in tile order.
    pub tile_cursors: Vec<Option<Cursor>>,
    /// Window generation.
    pub generation: u64,
    /// When the head was last refreshed.
    #[serde(default)]
    pub refreshed_at: Option<i64>,
}

/// Everything one page merge writes, committed atomically.
#[derive(Debug, Clone, Default)]
pub struct TimelineCommit {
    /// Author views embedded in the page's posts.
    pub authors: Vec<ProfileRef>,
    /// Posts of the page.
    pub posts: Vec<Post>,
    /// The merged window.
    pub window: TimelineWindow,
    /// When the merge happened.
    pub committed_at: i64,
    /// Set when the commit is a refresh.
    pub refreshed_at: Option<i64>,
}

/// A post with its resolved author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineItem {
    /// The post.
    pub post: Post,
    /// The author's profile, or the placeholder while it is not cached.
    pub author: Profile,
}

/// One tile of resolved items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimelineTile {
    /// Items in server order.
    pub items: Vec<TimelineItem>,
    /// Cursor for the page after this tile.
    pub cursor: Option<Cursor>,
}

impl LocalStore {
    /// Atomically merge a page: embedded author views, posts, the window's
    /// entry rows and its metadata.
    pub async fn commit_timeline(&self, key: &TimelineKey, commit: TimelineCommit) -> StoreResult<()> {
        let storage_key = key.storage_key();
        let mut tx = self.pool.begin().await?;

        let previous: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT meta FROM timelines WHERE key = ?1")
                .bind(&storage_key)
                .fetch_optional(&mut *tx)
                .await?;
        let previous_refresh = match previous {
            Some(bytes) => decode::<TimelineMeta>(Encoding::Compact, &bytes)?.refreshed_at,
            None => None,
        };

        let mut merged = Vec::new();
        for author in &commit.authors {
            if merge_author_tx(&mut tx, author).await? && !merged.contains(&author.did) {
                merged.push(author.did.clone());
            }
        }
        for post in &commit.posts {
            upsert_post_tx(&mut tx, post).await?;
        }

        let meta = TimelineMeta {
            tile_cursors: commit.window.tiles.iter().map(|t| t.cursor.clone()).collect(),
            generation: commit.window.generation,
            refreshed_at: commit.refreshed_at.or(previous_refresh),
        };
        sqlx::query(
            r#"
            INSERT INTO timelines (key, meta, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET meta = excluded.meta, updated_at = excluded.updated_at
            "#,
        )
        .bind(&storage_key)
        .bind(encode(Encoding::Compact, &meta)?)
        .bind(commit.committed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM timeline_entries WHERE key = ?1")
            .bind(&storage_key)
            .execute(&mut *tx)
            .await?;
        for (tile_index, tile) in commit.window.tiles.iter().enumerate() {
            for (position, uri) in tile.items.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO timeline_entries (key, tile, position, post_uri) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(&storage_key)
                .bind(tile_index as i64)
                .bind(position as i64)
                .bind(uri.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                        StoreError::Integrity {
                            reason: format!("timeline entry {uri} has no cached post"),
                        }
                    }
                    other => other.into(),
                })?;
            }
        }

        tx.commit().await?;
        tracing::debug!(
            %key,
            tiles = meta.tile_cursors.len(),
            generation = meta.generation,
            "committed timeline"
        );

        self.notify(StoreChange::Timeline(key.clone()));
        if !merged.is_empty() {
            self.notify(StoreChange::Profiles(merged));
        }
        if !commit.posts.is_empty() {
            self.notify(StoreChange::Posts(
                commit.posts.iter().map(|p| p.uri.clone()).collect(),
            ));
        }
        Ok(())
    }

    /// The stored window of `key`, if any.
    pub async fn timeline_window(&self, key: &TimelineKey) -> StoreResult<Option<TimelineWindow>> {
        let storage_key = key.storage_key();
        let mut tx = self.pool.begin().await?;

        let Some(meta) = read_meta(&mut tx, &storage_key).await? else {
            return Ok(None);
        };
        let entries: Vec<(i64, String)> = sqlx::query_as(
            "SELECT tile, post_uri FROM timeline_entries WHERE key = ?1 ORDER BY tile, position",
        )
        .bind(&storage_key)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut tiles: Vec<Tile> = meta
            .tile_cursors
            .into_iter()
            .map(|cursor| Tile {
                items: Vec::new(),
                cursor,
            })
            .collect();
        for (tile, uri) in entries {
            if let Some(t) = tiles.get_mut(tile as usize) {
                t.items.push(ContentId::new(uri));
            }
        }

        Ok(Some(TimelineWindow {
            tiles,
            generation: meta.generation,
        }))
    }

    /// Metadata of `key`, if a window is stored.
    pub async fn timeline_meta(&self, key: &TimelineKey) -> StoreResult<Option<TimelineMeta>> {
        let mut tx = self.pool.begin().await?;
        let meta = read_meta(&mut tx, &key.storage_key()).await?;
        tx.commit().await?;
        Ok(meta)
    }

    /// Resolved tiles of `key`, read as one consistent snapshot.
    pub async fn timeline_items(&self, key: &TimelineKey) -> StoreResult<Vec<TimelineTile>> {
        let storage_key = key.storage_key();
        let mut tx = self.pool.begin().await?;

        let Some(meta) = read_meta(&mut tx, &storage_key).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT e.tile,
                   p.uri, p.cid, p.claimed_author, p.text, p.tags, p.langs,
                   p.reply_count, p.repost_count, p.like_count, p.created_at, p.indexed_at,
                   a.did AS a_did, a.handle AS a_handle, a.display_name AS a_display_name,
                   a.description AS a_description, a.avatar AS a_avatar,
                   a.followers_count AS a_followers_count, a.follows_count AS a_follows_count,
                   a.posts_count AS a_posts_count, a.viewer_following AS a_viewer_following,
                   a.indexed_at AS a_indexed_at, a.created_at AS a_created_at
            FROM timeline_entries e
            JOIN posts p ON p.uri = e.post_uri
            JOIN profiles a ON a.did = p.author_did
            WHERE e.key = ?1
            ORDER BY e.tile, e.position
            "#,
        )
        .bind(&storage_key)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut tiles: Vec<TimelineTile> = meta
            .tile_cursors
            .into_iter()
            .map(|cursor| TimelineTile {
                items: Vec::new(),
                cursor,
            })
            .collect();
        for row in rows {
            let tile = row.tile as usize;
            let item = row.into_item()?;
            if let Some(t) = tiles.get_mut(tile) {
                t.items.push(item);
            }
        }
        Ok(tiles)
    }

    /// Drop the window of `key`. Cached posts stay.
    pub async fn clear_timeline(&self, key: &TimelineKey) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM timelines WHERE key = ?1")
            .bind(key.storage_key())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            self.notify(StoreChange::Timeline(key.clone()));
        }
        Ok(deleted > 0)
    }

    /// Keys of all stored windows.
    pub async fn timeline_keys(&self) -> StoreResult<Vec<TimelineKey>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM timelines ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        keys.iter()
            .map(|k| {
                TimelineKey::parse(k).map_err(|e| StoreError::InvalidRow {
                    table: "timelines",
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

async fn read_meta(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    storage_key: &str,
) -> StoreResult<Option<TimelineMeta>> {
    let bytes: Option<Vec<u8>> = sqlx::query_scalar("SELECT meta FROM timelines WHERE key = ?1")
        .bind(storage_key)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(bytes
        .map(|b| decode(Encoding::Compact, &b))
        .transpose()?)
}

/// Internal row type for resolved timeline entries.
#[derive(sqlx::FromRow)]
struct ItemRow {
    tile: i64,
    #[sqlx(flatten)]
    post: PostRow,
    a_did: String,
    a_handle: String,
    a_display_name: Option<String>,
    a_description: Option<String>,
    a_avatar: Option<String>,
    a_followers_count: i64,
    a_follows_count: i64,
    a_posts_count: i64,
    a_viewer_following: bool,
    a_indexed_at: Option<i64>,
    a_created_at: Option<i64>,
}

impl ItemRow {
    fn into_item(self) -> StoreResult<TimelineItem> {
        let post = Post::try_from(self.post)?;
        let author = Profile {
            did: fedline_types::Did::parse(self.a_did).map_err(|e| StoreError::InvalidRow {
                table: "profiles",
                reason: e.to_string(),
            })?,
            handle: fedline_types::Handle::new(self.a_handle),
            display_name: self.a_display_name,
            description: self.a_description,
            avatar: self.a_avatar,
            followers_count: self.a_followers_count,
            follows_count: self.a_follows_count,
            posts_count: self.a_posts_count,
            viewer_following: self.a_viewer_following,
            indexed_at: self.a_indexed_at,
            created_at: self.a_created_at,
        };
        Ok(TimelineItem { post, author })
    }
}
