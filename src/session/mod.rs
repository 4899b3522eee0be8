//! Session store: refresh-token sessions with a durable backend and a local fallback.
//!
//! [`SessionStore`] tries the durable backend first on every call and falls back to the
//! local backend when it errors. Callers never see which backend served them, and
//! storage failures never surface as request errors. A session written to the fallback
//! during an outage stays invisible to durable reads until [`SessionStore::migrate_from_fallback`]
//! runs on the next start.
//!
//! Concurrent meta updates for the same uid are last-write-wins; there is no versioning.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::profile::Profile;

mod file;
mod postgres;

pub use self::file::FileSessionBackend;
pub use self::postgres::PgSessionBackend;

/// 30 days.
pub const REFRESH_TTL_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// One logged-in browser or device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub uid: String,
    /// Hex SHA-256 of the refresh token. The raw token is never stored.
    pub token_hash: String,
    pub expires_at: i64,
    pub meta: Profile,
    pub created_at: i64,
}

impl SessionRecord {
    #[must_use]
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at
    }
}

#[derive(Clone, Debug)]
pub struct NewSession {
    pub uid: String,
    pub token_hash: String,
    pub expires_at: i64,
    pub meta: Profile,
}

impl NewSession {
    fn into_record(self, now_millis: i64) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            uid: self.uid,
            token_hash: self.token_hash,
            expires_at: self.expires_at,
            meta: self.meta,
            created_at: now_millis,
        }
    }
}

/// Partial update applied to the `meta` of every session of a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl MetaPatch {
    #[must_use]
    pub fn verified() -> Self {
        Self {
            is_verified: Some(true),
            ..Self::default()
        }
    }

    pub fn apply(&self, meta: &mut Profile) {
        if let Some(name) = &self.display_name {
            meta.display_name.clone_from(name);
        }
        if let Some(photo) = &self.photo_url {
            meta.photo_url = Some(photo.clone());
        }
        if self.is_verified == Some(true) {
            meta.is_verified = true;
        }
        if let Some(student_id) = &self.student_id {
            meta.student_id = Some(student_id.clone());
        }
        if let Some(department) = &self.department {
            meta.department = Some(department.clone());
        }
        if let Some(year) = &self.year {
            meta.year = Some(year.clone());
        }
    }
}

/// Storage primitive behind [`SessionStore`].
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn insert(&self, record: &SessionRecord) -> Result<()>;
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<SessionRecord>>;
    /// Most recently created session for `uid`.
    async fn latest_for_uid(&self, uid: &str) -> Result<Option<SessionRecord>>;
    /// Returns the number of sessions updated.
    async fn merge_meta_for_uid(&self, uid: &str, patch: &MetaPatch) -> Result<u64>;
    /// Returns `false` when no session matches `old_hash`.
    async fn rotate(&self, old_hash: &str, new_hash: &str, new_expires_at: i64) -> Result<bool>;
    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64>;
    async fn list(&self) -> Result<Vec<SessionRecord>>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
}

pub struct SessionStore {
    primary: Option<Arc<dyn SessionBackend>>,
    fallback: Arc<dyn SessionBackend>,
}

impl SessionStore {
    pub fn new(primary: Arc<dyn SessionBackend>, fallback: Arc<dyn SessionBackend>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    /// Store without a durable backend (no DSN, or the database was unreachable at boot).
    pub fn fallback_only(fallback: Arc<dyn SessionBackend>) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    #[must_use]
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Persist a new session. Always returns the record, even if both backends failed.
    pub async fn create(&self, session: NewSession) -> SessionRecord {
        let record = session.into_record(crate::now_millis());

        if let Some(primary) = &self.primary {
            match primary.insert(&record).await {
                Ok(()) => return record,
                Err(err) => warn!(
                    backend = primary.name(),
                    "createSession failed, falling back: {err:#}"
                ),
            }
        }

        if let Err(err) = self.fallback.insert(&record).await {
            error!(
                backend = self.fallback.name(),
                uid = %record.uid,
                "Failed to persist session: {err:#}"
            );
        }
        record
    }

    /// `None` when nothing matches or both backends failed.
    pub async fn find_by_hash(&self, token_hash: &str) -> Option<SessionRecord> {
        if let Some(primary) = &self.primary {
            match primary.find_by_hash(token_hash).await {
                Ok(found) => return found,
                Err(err) => warn!(
                    backend = primary.name(),
                    "findByTokenHash failed, falling back: {err:#}"
                ),
            }
        }

        self.fallback
            .find_by_hash(token_hash)
            .await
            .unwrap_or_else(|err| {
                error!(backend = self.fallback.name(), "Failed to find session: {err:#}");
                None
            })
    }

    pub async fn latest_for_uid(&self, uid: &str) -> Option<SessionRecord> {
        if let Some(primary) = &self.primary {
            match primary.latest_for_uid(uid).await {
                Ok(found) => return found,
                Err(err) => warn!(
                    backend = primary.name(),
                    uid, "latest session lookup failed, falling back: {err:#}"
                ),
            }
        }

        self.fallback.latest_for_uid(uid).await.unwrap_or_else(|err| {
            error!(backend = self.fallback.name(), uid, "Failed to load latest session: {err:#}");
            None
        })
    }

    /// Apply `patch` to every session of `uid` in both backends.
    ///
    /// # Errors
    /// Returns an error only when every backend failed.
    pub async fn merge_meta_for_uid(&self, uid: &str, patch: &MetaPatch) -> Result<u64> {
        let mut updated = 0;
        let mut primary_failed = false;

        if let Some(primary) = &self.primary {
            match primary.merge_meta_for_uid(uid, patch).await {
                Ok(count) => updated += count,
                Err(err) => {
                    warn!(backend = primary.name(), uid, "Failed to update session meta: {err:#}");
                    primary_failed = true;
                }
            }
        }

        // Sessions written during an outage live in the fallback until migrated.
        match self.fallback.merge_meta_for_uid(uid, patch).await {
            Ok(count) => updated += count,
            Err(err) if primary_failed || self.primary.is_none() => {
                return Err(err).context("failed to update session meta");
            }
            Err(err) => warn!(
                backend = self.fallback.name(),
                uid, "Failed to update fallback session meta: {err:#}"
            ),
        }

        Ok(updated)
    }

    /// Replace hash and expiry of the session matching `old_hash`. `false` when none matched.
    pub async fn rotate(&self, old_hash: &str, new_hash: &str, new_expires_at: i64) -> bool {
        if let Some(primary) = &self.primary {
            match primary.rotate(old_hash, new_hash, new_expires_at).await {
                Ok(rotated) => return rotated,
                Err(err) => warn!(
                    backend = primary.name(),
                    "rotateSession failed, falling back: {err:#}"
                ),
            }
        }

        self.fallback
            .rotate(old_hash, new_hash, new_expires_at)
            .await
            .unwrap_or_else(|err| {
                error!(backend = self.fallback.name(), "Failed to rotate session: {err:#}");
                false
            })
    }

    /// Idempotent. Removes the hash from both backends so a revoked token cannot resurface.
    pub async fn delete_by_hash(&self, token_hash: &str) {
        if let Some(primary) = &self.primary {
            if let Err(err) = primary.delete_by_hash(token_hash).await {
                warn!(backend = primary.name(), "Failed to delete session: {err:#}");
            }
        }
        if let Err(err) = self.fallback.delete_by_hash(token_hash).await {
            warn!(backend = self.fallback.name(), "Failed to delete session: {err:#}");
        }
    }

    /// Copy every fallback session into the durable backend, then clear the fallback.
    ///
    /// # Errors
    /// Returns an error if a record cannot be copied; the fallback is left untouched then.
    pub async fn migrate_from_fallback(&self) -> Result<MigrationReport> {
        let Some(primary) = &self.primary else {
            return Ok(MigrationReport::default());
        };

        let sessions = self
            .fallback
            .list()
            .await
            .context("failed to read fallback sessions")?;
        if sessions.is_empty() {
            return Ok(MigrationReport::default());
        }

        for record in &sessions {
            primary
                .insert(record)
                .await
                .with_context(|| format!("failed to migrate session {}", record.id))?;
        }

        self.fallback
            .clear()
            .await
            .context("failed to clear fallback sessions")?;

        info!(migrated = sessions.len(), "Migrated fallback sessions");

        Ok(MigrationReport {
            migrated: sessions.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::token::generate_refresh_token;
    use anyhow::{anyhow, Result};

    /// Durable backend double that fails every call.
    pub(crate) struct FailingBackend;

    #[async_trait]
    impl SessionBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn insert(&self, _record: &SessionRecord) -> Result<()> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn find_by_hash(&self, _token_hash: &str) -> Result<Option<SessionRecord>> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn latest_for_uid(&self, _uid: &str) -> Result<Option<SessionRecord>> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn merge_meta_for_uid(&self, _uid: &str, _patch: &MetaPatch) -> Result<u64> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn rotate(&self, _old: &str, _new: &str, _exp: i64) -> Result<bool> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn delete_by_hash(&self, _token_hash: &str) -> Result<u64> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn list(&self) -> Result<Vec<SessionRecord>> {
            Err(anyhow!("durable store unavailable"))
        }
        async fn clear(&self) -> Result<()> {
            Err(anyhow!("durable store unavailable"))
        }
    }

    fn new_session(uid: &str, token_hash: &str) -> NewSession {
        NewSession {
            uid: uid.to_string(),
            token_hash: token_hash.to_string(),
            expires_at: crate::now_millis() + REFRESH_TTL_MILLIS,
            meta: Profile {
                uid: uid.to_string(),
                ..Profile::default()
            },
        }
    }

    #[tokio::test]
    async fn create_falls_back_when_durable_fails() {
        let fallback = Arc::new(FileSessionBackend::in_memory());
        let store = SessionStore::new(Arc::new(FailingBackend), fallback.clone());

        let record = store.create(new_session("u1", "hash-1")).await;
        assert_eq!(record.uid, "u1");

        let found = store.find_by_hash("hash-1").await;
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn raw_token_never_matches() -> Result<()> {
        let store = SessionStore::fallback_only(Arc::new(FileSessionBackend::in_memory()));
        let (raw, hash) = generate_refresh_token()?;
        store.create(new_session("u1", &hash)).await;

        assert!(store.find_by_hash(&raw).await.is_none());
        assert!(store.find_by_hash(&hash).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SessionStore::new(
            Arc::new(FailingBackend),
            Arc::new(FileSessionBackend::in_memory()),
        );
        store.create(new_session("u1", "hash-1")).await;

        store.delete_by_hash("hash-1").await;
        store.delete_by_hash("hash-1").await;
        assert!(store.find_by_hash("hash-1").await.is_none());
    }

    #[tokio::test]
    async fn rotate_replaces_hash() {
        let store = SessionStore::fallback_only(Arc::new(FileSessionBackend::in_memory()));
        store.create(new_session("u1", "old")).await;

        assert!(store.rotate("old", "new", i64::MAX).await);
        assert!(store.find_by_hash("old").await.is_none());
        let rotated = store.find_by_hash("new").await;
        assert_eq!(rotated.map(|record| record.expires_at), Some(i64::MAX));

        assert!(!store.rotate("missing", "other", 0).await);
    }

    #[tokio::test]
    async fn merge_meta_touches_only_matching_uid() -> Result<()> {
        let store = SessionStore::fallback_only(Arc::new(FileSessionBackend::in_memory()));
        store.create(new_session("u1", "a")).await;
        store.create(new_session("u1", "b")).await;
        store.create(new_session("u2", "c")).await;

        let updated = store.merge_meta_for_uid("u1", &MetaPatch::verified()).await?;
        assert_eq!(updated, 2);

        for hash in ["a", "b"] {
            let record = store.find_by_hash(hash).await;
            assert_eq!(record.map(|r| r.meta.is_verified), Some(true));
        }
        let other = store.find_by_hash("c").await;
        assert_eq!(other.map(|r| r.meta.is_verified), Some(false));
        Ok(())
    }

    #[tokio::test]
    async fn merge_meta_fails_when_every_backend_fails() {
        let store = SessionStore::fallback_only(Arc::new(FailingBackend));
        assert!(store
            .merge_meta_for_uid("u1", &MetaPatch::verified())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn migration_moves_fallback_into_primary() -> Result<()> {
        let primary = Arc::new(FileSessionBackend::in_memory());
        let fallback = Arc::new(FileSessionBackend::in_memory());

        let outage = SessionStore::fallback_only(fallback.clone());
        let first = outage.create(new_session("u1", "a")).await;
        outage.create(new_session("u2", "b")).await;

        let store = SessionStore::new(primary.clone(), fallback.clone());
        let report = store.migrate_from_fallback().await?;
        assert_eq!(report, MigrationReport { migrated: 2 });

        assert!(fallback.list().await?.is_empty());
        let migrated = primary.find_by_hash("a").await?;
        assert_eq!(migrated.map(|record| record.id), Some(first.id));
        Ok(())
    }

    #[tokio::test]
    async fn migration_keeps_fallback_when_primary_fails() -> Result<()> {
        let fallback = Arc::new(FileSessionBackend::in_memory());
        SessionStore::fallback_only(fallback.clone())
            .create(new_session("u1", "a"))
            .await;

        let store = SessionStore::new(Arc::new(FailingBackend), fallback.clone());
        assert!(store.migrate_from_fallback().await.is_err());
        assert_eq!(fallback.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn latest_for_uid_prefers_newest() {
        let store = SessionStore::fallback_only(Arc::new(FileSessionBackend::in_memory()));
        store.create(new_session("u1", "a")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newest = store.create(new_session("u1", "b")).await;

        let latest = store.latest_for_uid("u1").await;
        assert_eq!(latest.map(|record| record.id), Some(newest.id));
    }

    #[test]
    fn expiry_is_strict() {
        let record = NewSession {
            uid: "u1".to_string(),
            token_hash: "h".to_string(),
            expires_at: 1_000,
            meta: Profile::default(),
        }
        .into_record(0);
        assert!(!record.is_expired_at(1_000));
        assert!(record.is_expired_at(1_001));
    }

    #[test]
    fn meta_patch_serializes_only_present_fields() -> Result<()> {
        let patch = MetaPatch {
            photo_url: Some("p".to_string()),
            ..MetaPatch::default()
        };
        assert_eq!(serde_json::to_value(&patch)?, serde_json::json!({"photoURL": "p"}));
        Ok(())
    }
}
