//! Posts, lists and messages.

use sqlx::{Sqlite, Transaction};

use fedline_types::{
    decode, encode, ContentId, Did, Encoding, ListPurpose, ListRecord, Message, Post,
    UNKNOWN_PROFILE_DID,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{LocalStore, StoreChange};

pub(crate) const POST_COLUMNS: &str = "uri, cid, claimed_author, text, tags, langs, \
     reply_count, repost_count, like_count, created_at, indexed_at";

impl LocalStore {
    // ===========================================
    // Posts
    // ===========================================

    /// Insert or update a post. The author resolves to its profile row or
    /// the placeholder.
    pub async fn upsert_post(&self, post: &Post) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        upsert_post_tx(&mut tx, post).await?;
        tx.commit().await?;
        self.notify(StoreChange::Posts(vec![post.uri.clone()]));
        Ok(())
    }

    /// Get a post by uri.
    pub async fn post(&self, uri: &ContentId) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE uri = ?1"
        ))
        .bind(uri.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Post::try_from).transpose()
    }

    /// Delete a post. Timeline entries pointing at it go with it.
    pub async fn delete_post(&self, uri: &ContentId) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM posts WHERE uri = ?1")
            .bind(uri.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            self.notify(StoreChange::Posts(vec![uri.clone()]));
        }
        Ok(deleted > 0)
    }

    /// Number of cached posts.
    pub async fn post_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Posts whose author resolves to `did`, newest first.
    pub async fn posts_by_author(&self, did: &Did) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_did = ?1 ORDER BY created_at DESC"
        ))
        .bind(did.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Post::try_from).collect()
    }

    // ===========================================
    // Lists
    // ===========================================

    /// Insert or update a list.
    pub async fn upsert_list(&self, list: &ListRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lists (uri, owner_did, claimed_owner, name, purpose, description, created_at)
            VALUES (?1, COALESCE((SELECT did FROM profiles WHERE did = ?2), ?3), ?2, ?4, ?5, ?6, ?7)
            ON CONFLICT(uri) DO UPDATE SET
                owner_did = excluded.owner_did,
                claimed_owner = excluded.claimed_owner,
                name = excluded.name,
                purpose = excluded.purpose,
                description = excluded.description,
                created_at = excluded.created_at
            "#,
        )
        .bind(list.uri.as_str())
        .bind(list.owner.as_str())
        .bind(UNKNOWN_PROFILE_DID)
        .bind(&list.name)
        .bind(list.purpose.as_str())
        .bind(&list.description)
        .bind(list.created_at)
        .execute(&self.pool)
        .await?;

        self.notify(StoreChange::Lists);
        Ok(())
    }

    /// Get a list by uri.
    pub async fn list(&self, uri: &ContentId) -> StoreResult<Option<ListRecord>> {
        let row = sqlx::query_as::<_, ListRow>(
            "SELECT uri, claimed_owner, name, purpose, description, created_at FROM lists WHERE uri = ?1",
        )
        .bind(uri.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ListRecord::try_from).transpose()
    }

    /// Delete a list and its membership rows.
    pub async fn delete_list(&self, uri: &ContentId) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM lists WHERE uri = ?1")
            .bind(uri.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            self.notify(StoreChange::Lists);
        }
        Ok(deleted > 0)
    }

    // ===========================================
    // Messages
    // ===========================================

    /// Insert or update a message.
    pub async fn upsert_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_did, claimed_sender, text, sent_at)
            VALUES (?1, COALESCE((SELECT did FROM profiles WHERE did = ?2), ?3), ?2, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                sender_did = excluded.sender_did,
                claimed_sender = excluded.claimed_sender,
                text = excluded.text,
                sent_at = excluded.sent_at
            "#,
        )
        .bind(message.id.as_str())
        .bind(message.sender.as_str())
        .bind(UNKNOWN_PROFILE_DID)
        .bind(&message.text)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        self.notify(StoreChange::Messages);
        Ok(())
    }

    /// Get a message by id.
    pub async fn message(&self, id: &ContentId) -> StoreResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, claimed_sender, text, sent_at FROM messages WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }

    /// Delete a message and its membership rows.
    pub async fn delete_message(&self, id: &ContentId) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            self.notify(StoreChange::Messages);
        }
        Ok(deleted > 0)
    }

    /// File a message into a list. Idempotent.
    pub async fn add_message_to_list(
        &self,
        list_uri: &ContentId,
        message_id: &ContentId,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO list_messages (list_uri, message_id) VALUES (?1, ?2) \
             ON CONFLICT(list_uri, message_id) DO NOTHING",
        )
        .bind(list_uri.as_str())
        .bind(message_id.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.notify(StoreChange::Lists);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::Integrity {
                    reason: format!("unknown list {list_uri} or message {message_id}"),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Messages filed into a list, oldest first.
    pub async fn messages_in_list(&self, list_uri: &ContentId) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT m.id, m.claimed_sender, m.text, m.sent_at
            FROM messages m
            JOIN list_messages lm ON lm.message_id = m.id
            WHERE lm.list_uri = ?1
            ORDER BY m.sent_at ASC
            "#,
        )
        .bind(list_uri.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    /// Number of membership rows of a list.
    pub async fn list_message_count(&self, list_uri: &ContentId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_messages WHERE list_uri = ?1")
            .bind(list_uri.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

pub(crate) async fn upsert_post_tx(tx: &mut Transaction<'_, Sqlite>, post: &Post) -> StoreResult<()> {
    let tags = encode(Encoding::Compact, &post.tags)?;
    let langs = encode(Encoding::Compact, &post.langs)?;

    sqlx::query(
        r#"
        INSERT INTO posts (uri, cid, author_did, claimed_author, text, tags, langs,
            reply_count, repost_count, like_count, created_at, indexed_at)
        VALUES (?1, ?2, COALESCE((SELECT did FROM profiles WHERE did = ?3), ?4), ?3,
            ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            author_did = excluded.author_did,
            claimed_author = excluded.claimed_author,
            text = excluded.text,
            tags = excluded.tags,
            langs = excluded.langs,
            reply_count = excluded.reply_count,
            repost_count = excluded.repost_count,
            like_count = excluded.like_count,
            created_at = excluded.created_at,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(post.uri.as_str())
    .bind(&post.cid)
    .bind(post.author.as_str())
    .bind(UNKNOWN_PROFILE_DID)
    .bind(&post.text)
    .bind(tags)
    .bind(langs)
    .bind(post.reply_count)
    .bind(post.repost_count)
    .bind(post.like_count)
    .bind(post.created_at)
    .bind(post.indexed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn invalid(table: &'static str, reason: impl ToString) -> StoreError {
    StoreError::InvalidRow {
        table,
        reason: reason.to_string(),
    }
}

/// Internal row type for post queries.
#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) uri: String,
    pub(crate) cid: Option<String>,
    pub(crate) claimed_author: String,
    pub(crate) text: String,
    pub(crate) tags: Vec<u8>,
    pub(crate) langs: Vec<u8>,
    pub(crate) reply_count: i64,
    pub(crate) repost_count: i64,
    pub(crate) like_count: i64,
    pub(crate) created_at: i64,
    pub(crate) indexed_at: Option<i64>,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Post {
            uri: ContentId::new(row.uri),
            cid: row.cid,
            author: Did::parse(row.claimed_author).map_err(|e| invalid("posts", e))?,
            text: row.text,
            tags: decode(Encoding::Compact, &row.tags)?,
            langs: decode(Encoding::Compact, &row.langs)?,
            reply_count: row.reply_count,
            repost_count: row.repost_count,
            like_count: row.like_count,
            created_at: row.created_at,
            indexed_at: row.indexed_at,
        })
    }
}

/// Internal row type for list queries.
#[derive(sqlx::FromRow)]
struct ListRow {
    uri: String,
    claimed_owner: String,
    name: String,
    purpose: String,
    description: Option<String>,
    created_at: i64,
}

impl TryFrom<ListRow> for ListRecord {
    type Error = StoreError;

    fn try_from(row: ListRow) -> Result<Self, Self::Error> {
        Ok(ListRecord {
            uri: ContentId::new(row.uri),
            owner: Did::parse(row.claimed_owner).map_err(|e| invalid("lists", e))?,
            name: row.name,
            purpose: ListPurpose::parse(&row.purpose)
                .ok_or_else(|| invalid("lists", format!("unknown purpose {}", row.purpose)))?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

/// Internal row type for message queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    claimed_sender: String,
    text: String,
    sent_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: ContentId::new(row.id),
            sender: Did::parse(row.claimed_sender).map_err(|e| invalid("messages", e))?,
            text: row.text,
            sent_at: row.sent_at,
        })
    }
}
