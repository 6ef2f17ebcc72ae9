//! Profile rows and author resolution.

use sqlx::{Sqlite, Transaction};

use fedline_types::{Did, Handle, Profile, ProfileRef, UNKNOWN_PROFILE_DID};

use crate::error::{StoreError, StoreResult};
use crate::store::{LocalStore, StoreChange};

pub(crate) const PROFILE_COLUMNS: &str = "did, handle, display_name, description, avatar, \
     followers_count, follows_count, posts_count, viewer_following, indexed_at, created_at";

impl LocalStore {
    /// Insert or update a profile.
    ///
    /// Content cached under the placeholder profile whose claimed author is
    /// this did is re-pointed at the new row.
    pub async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.upsert_profiles(std::slice::from_ref(profile)).await
    }

    /// Insert or update several profiles in one transaction.
    pub async fn upsert_profiles(&self, profiles: &[Profile]) -> StoreResult<()> {
        if profiles.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for profile in profiles {
            upsert_profile_tx(&mut tx, profile).await?;
        }
        tx.commit().await?;

        self.notify(StoreChange::Profiles(
            profiles.iter().map(|p| p.did.clone()).collect(),
        ));
        Ok(())
    }

    /// Insert a bare profile row only if none exists for its did.
    ///
    /// The stub takes over content cached under the placeholder and stays a
    /// candidate for [`missing_profiles`](Self::missing_profiles).
    pub async fn ensure_profile(&self, profile: &Profile) -> StoreResult<()> {
        if profile.is_unknown() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO profiles (did, handle) VALUES (?1, ?2) ON CONFLICT(did) DO NOTHING",
        )
        .bind(profile.did.as_str())
        .bind(profile.handle.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted > 0 {
            repoint_tx(&mut tx, &profile.did).await?;
        }
        tx.commit().await?;

        if inserted > 0 {
            self.notify(StoreChange::Profiles(vec![profile.did.clone()]));
        }
        Ok(())
    }

    /// Get a profile by did.
    pub async fn profile(&self, did: &Did) -> StoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE did = ?1"
        ))
        .bind(did.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Profile::try_from).transpose()
    }

    /// Delete a profile and, by cascade, all content it owns.
    ///
    /// Returns whether a row was deleted.
    pub async fn delete_profile(&self, did: &Did) -> StoreResult<bool> {
        if did.is_unknown() {
            return Err(StoreError::Integrity {
                reason: "placeholder profile cannot be deleted".into(),
            });
        }
        let deleted = sqlx::query("DELETE FROM profiles WHERE did = ?1")
            .bind(did.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            tracing::debug!(%did, "deleted profile");
            self.notify(StoreChange::ProfileDeleted(did.clone()));
        }
        Ok(deleted > 0)
    }

    /// Number of cached profiles, not counting the placeholder.
    pub async fn profile_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE did != ?1")
            .bind(UNKNOWN_PROFILE_DID)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// The did content by `claimed` should point at: the did itself when a
    /// profile row exists, the placeholder otherwise.
    pub async fn resolve_author(&self, claimed: &Did) -> StoreResult<Did> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE did = ?1)")
                .bind(claimed.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(if exists { claimed.clone() } else { Did::unknown() })
    }

    /// Of `dids`, the ones without a fully hydrated profile row.
    pub async fn missing_profiles(&self, dids: &[Did]) -> StoreResult<Vec<Did>> {
        let mut missing = Vec::new();
        for did in dids {
            if did.is_unknown() || missing.contains(did) {
                continue;
            }
            let hydrated: Option<bool> =
                sqlx::query_scalar("SELECT hydrated FROM profiles WHERE did = ?1")
                    .bind(did.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            if hydrated != Some(true) {
                missing.push(did.clone());
            }
        }
        Ok(missing)
    }
}

pub(crate) async fn upsert_profile_tx(
    tx: &mut Transaction<'_, Sqlite>,
    profile: &Profile,
) -> StoreResult<()> {
    if profile.is_unknown() {
        return Err(StoreError::Integrity {
            reason: "placeholder profile cannot be overwritten".into(),
        });
    }
    let did = profile.did.as_str();

    sqlx::query(
        r#"
        INSERT INTO profiles (did, handle, display_name, description, avatar,
            followers_count, follows_count, posts_count, viewer_following, indexed_at, created_at,
            hydrated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)
        ON CONFLICT(did) DO UPDATE SET
            handle = excluded.handle,
            display_name = excluded.display_name,
            description = excluded.description,
            avatar = excluded.avatar,
            followers_count = excluded.followers_count,
            follows_count = excluded.follows_count,
            posts_count = excluded.posts_count,
            viewer_following = excluded.viewer_following,
            indexed_at = excluded.indexed_at,
            created_at = excluded.created_at,
            hydrated = 1
        "#,
    )
    .bind(did)
    .bind(profile.handle.as_str())
    .bind(&profile.display_name)
    .bind(&profile.description)
    .bind(&profile.avatar)
    .bind(profile.followers_count)
    .bind(profile.follows_count)
    .bind(profile.posts_count)
    .bind(profile.viewer_following)
    .bind(profile.indexed_at)
    .bind(profile.created_at)
    .execute(&mut **tx)
    .await?;

    repoint_tx(tx, &profile.did).await
}

/// Merge an author view embedded in a post.
///
/// Only the fields the view carries are written; counts, description and
/// anything absent keep their cached values. Returns false for a view with
/// no handle, which carries no profile data.
pub(crate) async fn merge_author_tx(
    tx: &mut Transaction<'_, Sqlite>,
    author: &ProfileRef,
) -> StoreResult<bool> {
    let Some(handle) = author.handle.as_ref().filter(|h| !h.is_empty()) else {
        return Ok(false);
    };
    if author.did.is_unknown() {
        return Err(StoreError::Integrity {
            reason: "placeholder profile cannot be overwritten".into(),
        });
    }

    sqlx::query(
        r#"
        INSERT INTO profiles (did, handle, display_name, avatar, viewer_following)
        VALUES (?1, ?2, ?3, ?4, COALESCE(?5, 0))
        ON CONFLICT(did) DO UPDATE SET
            handle = excluded.handle,
            display_name = COALESCE(?3, profiles.display_name),
            avatar = COALESCE(?4, profiles.avatar),
            viewer_following = COALESCE(?5, profiles.viewer_following)
        "#,
    )
    .bind(author.did.as_str())
    .bind(handle.as_str())
    .bind(&author.display_name)
    .bind(&author.avatar)
    .bind(author.viewer_following)
    .execute(&mut **tx)
    .await?;

    repoint_tx(tx, &author.did).await?;
    Ok(true)
}

/// Point content cached under the placeholder at `did`'s own row.
async fn repoint_tx(tx: &mut Transaction<'_, Sqlite>, did: &Did) -> StoreResult<()> {
    let did = did.as_str();
    for statement in [
        "UPDATE posts SET author_did = ?1 WHERE author_did = ?2 AND claimed_author = ?1",
        "UPDATE lists SET owner_did = ?1 WHERE owner_did = ?2 AND claimed_owner = ?1",
        "UPDATE messages SET sender_did = ?1 WHERE sender_did = ?2 AND claimed_sender = ?1",
    ] {
        sqlx::query(statement)
            .bind(did)
            .bind(UNKNOWN_PROFILE_DID)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Internal row type for profile queries.
#[derive(sqlx::FromRow)]
pub(crate) struct ProfileRow {
    did: String,
    handle: String,
    display_name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    followers_count: i64,
    follows_count: i64,
    posts_count: i64,
    viewer_following: bool,
    indexed_at: Option<i64>,
    created_at: Option<i64>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            did: Did::parse(row.did).map_err(|e| StoreError::InvalidRow {
                table: "profiles",
                reason: e.to_string(),
            })?,
            handle: Handle::new(row.handle),
            display_name: row.display_name,
            description: row.description,
            avatar: row.avatar,
            followers_count: row.followers_count,
            follows_count: row.follows_count,
            posts_count: row.posts_count,
            viewer_following: row.viewer_following,
            indexed_at: row.indexed_at,
            created_at: row.created_at,
        })
    }
}
