//! SQLite-backed local cache.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

use fedline_types::{ContentId, Did, TimelineKey};

use crate::error::StoreResult;
use crate::kv::SqliteKeyValueStore;
use crate::schema;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification broadcast after a write commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Profiles were inserted or updated.
    Profiles(Vec<Did>),
    /// A profile and everything it owns was deleted.
    ProfileDeleted(Did),
    /// Posts were inserted, updated or deleted.
    Posts(Vec<ContentId>),
    /// Lists or list membership changed.
    Lists,
    /// Messages changed.
    Messages,
    /// Muted words of a profile changed.
    MutedWords(Did),
    /// A timeline window was committed or cleared.
    Timeline(TimelineKey),
}

impl StoreChange {
    /// Check if the change can alter the projection of `key` for `viewer`.
    pub fn affects(&self, key: &TimelineKey, viewer: Option<&Did>) -> bool {
        match self {
            Self::Timeline(changed) => changed == key,
            Self::MutedWords(owner) => viewer == Some(owner),
            Self::Lists | Self::Messages => false,
            Self::Profiles(_) | Self::ProfileDeleted(_) | Self::Posts(_) => true,
        }
    }
}

/// Persistent cache of profiles, content, preferences and timeline windows.
///
/// Uses WAL mode for concurrent reads and enforces foreign keys on every
/// connection, so deletes cascade natively.
#[derive(Clone)]
pub struct LocalStore {
    pub(crate) pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    /// Open (or create) a database file.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "opened local store");
        Self::with_pool(pool).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal);

        // A single connection that never expires, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        schema::run_migrations(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Key-value store sharing this database.
    pub fn key_value_store(&self) -> SqliteKeyValueStore {
        SqliteKeyValueStore::new(self.pool.clone())
    }

    pub(crate) fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}
