//! Durable key-value byte store.
//!
//! Holds small opaque records such as the encoded session. Values are
//! bytes; callers pick the codec.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreResult;

/// Trait for key-value storage backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// In-memory key-value store (for testing and ephemeral hosts).
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Key-value store backed by the `kv` table of a [`crate::LocalStore`]
/// database.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalStore;

    async fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("session").await.unwrap(), None);

        store.put("session", b"one").await.unwrap();
        assert_eq!(store.get("session").await.unwrap(), Some(b"one".to_vec()));

        // Last writer wins.
        store.put("session", b"two").await.unwrap();
        assert_eq!(store.get("session").await.unwrap(), Some(b"two".to_vec()));

        store.delete("session").await.unwrap();
        assert_eq!(store.get("session").await.unwrap(), None);
        store.delete("session").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_semantics() {
        let store = MemoryKeyValueStore::new();
        exercise(&store).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_semantics() {
        let local = LocalStore::in_memory().await.unwrap();
        exercise(&local.key_value_store()).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let local = LocalStore::open(&path).await.unwrap();
            local.key_value_store().put("k", b"v").await.unwrap();
        }
        let local = LocalStore::open(&path).await.unwrap();
        assert_eq!(
            local.key_value_store().get("k").await.unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[tokio::test]
    async fn memory_clones_share_state() {
        let a = MemoryKeyValueStore::new();
        let b = a.clone();
        a.put("k", b"v").await.unwrap();
        assert_eq!(b.len(), 1);
    }
}
