//! Muted-word preferences.
//!
//! Targets and actor target are stored as compact blobs. Expired rules are
//! kept; [`LocalStore::active_muted_words`] filters them at read time.

use std::collections::BTreeSet;

use fedline_types::{
    decode, encode, Did, Encoding, MutedWordActorTarget, MutedWordPreference, MutedWordTarget,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{LocalStore, StoreChange};

const MUTED_WORD_COLUMNS: &str = "id, owner_did, value, targets, actor_target, expires_at";

impl LocalStore {
    /// Insert or update a muted-word rule. The owner must be cached.
    pub async fn upsert_muted_word(&self, rule: &MutedWordPreference) -> StoreResult<()> {
        if rule.owner.is_unknown() || self.profile(&rule.owner).await?.is_none() {
            return Err(StoreError::Integrity {
                reason: format!("muted word owner {} is not cached", rule.owner),
            });
        }
        let targets = encode(Encoding::Compact, &rule.targets)?;
        let actor_target = rule
            .actor_target
            .as_ref()
            .map(|t| encode(Encoding::Compact, t))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO muted_words (id, owner_did, value, targets, actor_target, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                owner_did = excluded.owner_did,
                value = excluded.value,
                targets = excluded.targets,
                actor_target = excluded.actor_target,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&rule.id)
        .bind(rule.owner.as_str())
        .bind(&rule.value)
        .bind(targets)
        .bind(actor_target)
        .bind(rule.expires_at)
        .execute(&self.pool)
        .await?;

        self.notify(StoreChange::MutedWords(rule.owner.clone()));
        Ok(())
    }

    /// All rules of `owner`, expired ones included.
    pub async fn muted_words(&self, owner: &Did) -> StoreResult<Vec<MutedWordPreference>> {
        let rows = sqlx::query_as::<_, MutedWordRow>(&format!(
            "SELECT {MUTED_WORD_COLUMNS} FROM muted_words WHERE owner_did = ?1 ORDER BY value"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MutedWordPreference::try_from).collect()
    }

    /// Rules of `owner` that have not expired at `now_ms`.
    pub async fn active_muted_words(
        &self,
        owner: &Did,
        now_ms: i64,
    ) -> StoreResult<Vec<MutedWordPreference>> {
        let rows = sqlx::query_as::<_, MutedWordRow>(&format!(
            "SELECT {MUTED_WORD_COLUMNS} FROM muted_words \
             WHERE owner_did = ?1 AND (expires_at IS NULL OR expires_at > ?2) ORDER BY value"
        ))
        .bind(owner.as_str())
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MutedWordPreference::try_from).collect()
    }

    /// Delete a rule by id.
    pub async fn delete_muted_word(&self, id: &str) -> StoreResult<bool> {
        let owner: Option<String> =
            sqlx::query_scalar("DELETE FROM muted_words WHERE id = ?1 RETURNING owner_did")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match owner.map(Did::parse).transpose() {
            Ok(Some(owner)) => {
                self.notify(StoreChange::MutedWords(owner));
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::InvalidRow {
                table: "muted_words",
                reason: e.to_string(),
            }),
        }
    }
}

/// Internal row type for muted-word queries.
#[derive(sqlx::FromRow)]
struct MutedWordRow {
    id: String,
    owner_did: String,
    value: String,
    targets: Vec<u8>,
    actor_target: Option<Vec<u8>>,
    expires_at: Option<i64>,
}

impl TryFrom<MutedWordRow> for MutedWordPreference {
    type Error = StoreError;

    fn try_from(row: MutedWordRow) -> Result<Self, Self::Error> {
        let targets: BTreeSet<MutedWordTarget> = decode(Encoding::Compact, &row.targets)?;
        let actor_target: Option<MutedWordActorTarget> = row
            .actor_target
            .as_deref()
            .map(|bytes| decode(Encoding::Compact, bytes))
            .transpose()?;

        Ok(MutedWordPreference {
            id: row.id,
            owner: Did::parse(row.owner_did).map_err(|e| StoreError::InvalidRow {
                table: "muted_words",
                reason: e.to_string(),
            })?,
            value: row.value,
            targets,
            actor_target,
            expires_at: row.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedline_types::{Handle, Profile};

    async fn store_with_viewer() -> (LocalStore, Did) {
        let store = LocalStore::in_memory().await.unwrap();
        let viewer = Did::parse("did:plc:viewer").unwrap();
        store
            .upsert_profile(&Profile::new(viewer.clone(), Handle::new("viewer.example")))
            .await
            .unwrap();
        (store, viewer)
    }

    #[tokio::test]
    async fn rule_roundtrip() {
        let (store, viewer) = store_with_viewer().await;
        let rule = MutedWordPreference::new(
            viewer.clone(),
            "spoilers",
            [MutedWordTarget::Content, MutedWordTarget::Tag],
        )
        .with_actor_target(MutedWordActorTarget::ExcludeFollowing)
        .with_expiry(9_000);

        store.upsert_muted_word(&rule).await.unwrap();
        assert_eq!(store.muted_words(&viewer).await.unwrap(), vec![rule]);
    }

    #[tokio::test]
    async fn expired_rules_are_kept_but_inactive() {
        let (store, viewer) = store_with_viewer().await;
        let expired =
            MutedWordPreference::new(viewer.clone(), "old", [MutedWordTarget::Content]).with_expiry(100);
        let forever = MutedWordPreference::new(viewer.clone(), "new", [MutedWordTarget::Content]);
        store.upsert_muted_word(&expired).await.unwrap();
        store.upsert_muted_word(&forever).await.unwrap();

        assert_eq!(store.muted_words(&viewer).await.unwrap().len(), 2);
        let active = store.active_muted_words(&viewer, 1_000).await.unwrap();
        assert_eq!(active, vec![forever]);
        let active = store.active_muted_words(&viewer, 50).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn owner_must_be_cached() {
        let store = LocalStore::in_memory().await.unwrap();
        let rule = MutedWordPreference::new(
            Did::parse("did:plc:nobody").unwrap(),
            "x",
            [MutedWordTarget::Content],
        );
        let result = store.upsert_muted_word(&rule).await;
        assert!(matches!(result, Err(StoreError::Integrity { .. })));
    }

    #[tokio::test]
    async fn delete_rule_and_cascade_from_owner() {
        let (store, viewer) = store_with_viewer().await;
        let a = MutedWordPreference::new(viewer.clone(), "a", [MutedWordTarget::Content]);
        let b = MutedWordPreference::new(viewer.clone(), "b", [MutedWordTarget::Tag]);
        store.upsert_muted_word(&a).await.unwrap();
        store.upsert_muted_word(&b).await.unwrap();

        assert!(store.delete_muted_word(&a.id).await.unwrap());
        assert!(!store.delete_muted_word(&a.id).await.unwrap());

        store.delete_profile(&viewer).await.unwrap();
        assert!(store.muted_words(&viewer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_notifies_owner() {
        let (store, viewer) = store_with_viewer().await;
        let mut changes = store.subscribe();
        let rule = MutedWordPreference::new(viewer.clone(), "a", [MutedWordTarget::Content]);
        store.upsert_muted_word(&rule).await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), StoreChange::MutedWords(viewer));
    }
}
