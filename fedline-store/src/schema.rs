//! Database schema.
//!
//! Every content table carries two author columns: the did the record
//! claims and the resolved profile row it points at. The resolved column is
//! the foreign key; it holds the placeholder profile until the real author
//! is cached, at which point upserting the profile re-points the rows.
//!
//! `profiles.hydrated` is set only by a full profile upsert. Rows created
//! from embedded author views or as bare stubs stay candidates for lookup.

use sqlx::SqlitePool;

use fedline_types::UNKNOWN_PROFILE_DID;

use crate::error::StoreResult;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        did TEXT PRIMARY KEY,
        handle TEXT NOT NULL,
        display_name TEXT,
        description TEXT,
        avatar TEXT,
        followers_count INTEGER NOT NULL DEFAULT 0,
        follows_count INTEGER NOT NULL DEFAULT 0,
        posts_count INTEGER NOT NULL DEFAULT 0,
        viewer_following INTEGER NOT NULL DEFAULT 0,
        indexed_at INTEGER,
        created_at INTEGER,
        hydrated INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        uri TEXT PRIMARY KEY,
        cid TEXT,
        author_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
        claimed_author TEXT NOT NULL,
        text TEXT NOT NULL,
        tags BLOB NOT NULL,
        langs BLOB NOT NULL,
        reply_count INTEGER NOT NULL DEFAULT 0,
        repost_count INTEGER NOT NULL DEFAULT 0,
        like_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        indexed_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lists (
        uri TEXT PRIMARY KEY,
        owner_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
        claimed_owner TEXT NOT NULL,
        name TEXT NOT NULL,
        purpose TEXT NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        sender_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
        claimed_sender TEXT NOT NULL,
        text TEXT NOT NULL,
        sent_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS list_messages (
        list_uri TEXT NOT NULL REFERENCES lists(uri) ON DELETE CASCADE,
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        PRIMARY KEY (list_uri, message_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS muted_words (
        id TEXT PRIMARY KEY,
        owner_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
        value TEXT NOT NULL,
        targets BLOB NOT NULL,
        actor_target BLOB,
        expires_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timelines (
        key TEXT PRIMARY KEY,
        meta BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_entries (
        key TEXT NOT NULL REFERENCES timelines(key) ON DELETE CASCADE,
        tile INTEGER NOT NULL,
        position INTEGER NOT NULL,
        post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
        PRIMARY KEY (key, tile, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_did)",
    "CREATE INDEX IF NOT EXISTS idx_posts_claimed_author ON posts(claimed_author)",
    "CREATE INDEX IF NOT EXISTS idx_lists_owner ON lists(owner_did)",
    "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_did)",
    "CREATE INDEX IF NOT EXISTS idx_list_messages_message ON list_messages(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_muted_words_owner ON muted_words(owner_did)",
    "CREATE INDEX IF NOT EXISTS idx_muted_words_value ON muted_words(value)",
    "CREATE INDEX IF NOT EXISTS idx_muted_words_expires ON muted_words(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_entries_post ON timeline_entries(post_uri)",
];

/// Create tables, indexes and the placeholder profile.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    for statement in TABLES.iter().chain(INDEXES) {
        sqlx::query(statement).execute(pool).await?;
    }

    sqlx::query("INSERT INTO profiles (did, handle) VALUES (?1, '') ON CONFLICT(did) DO NOTHING")
        .bind(UNKNOWN_PROFILE_DID)
        .execute(pool)
        .await?;

    Ok(())
}
