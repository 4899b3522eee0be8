//! Local fallback backend: a JSON file (`{"sessions": [...]}`) or, without a path, process memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use super::{MetaPatch, SessionBackend, SessionRecord};

#[derive(Serialize, Deserialize, Default)]
struct SessionFile {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

pub struct FileSessionBackend {
    path: Option<PathBuf>,
    sessions: Mutex<Vec<SessionRecord>>,
}

impl FileSessionBackend {
    /// Load sessions from `path`. A missing file starts empty; an unreadable one is reset.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sessions = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<SessionFile>(&bytes) {
                Ok(file) => file.sessions,
                Err(err) => {
                    warn!(path = %path.display(), "sessions file parse failed, resetting: {err}");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read sessions file {}", path.display()))
            }
        };

        Ok(Self {
            path: Some(path),
            sessions: Mutex::new(sessions),
        })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sessions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // Called with the lock held so writes never interleave.
    async fn persist(&self, sessions: &[SessionRecord]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let body = serde_json::to_vec_pretty(&SessionFile {
            sessions: sessions.to_vec(),
        })
        .context("failed to serialize sessions")?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))
    }
}

#[async_trait]
impl SessionBackend for FileSessionBackend {
    fn name(&self) -> &'static str {
        if self.path.is_some() {
            "file"
        } else {
            "memory"
        }
    }

    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .iter()
            .any(|existing| existing.id == record.id || existing.token_hash == record.token_hash)
        {
            return Ok(());
        }
        sessions.push(record.clone());
        self.persist(&sessions).await
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .find(|record| record.token_hash == token_hash)
            .cloned())
    }

    async fn latest_for_uid(&self, uid: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .filter(|record| record.uid == uid)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn merge_meta_for_uid(&self, uid: &str, patch: &MetaPatch) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut updated = 0;
        for record in sessions.iter_mut().filter(|record| record.uid == uid) {
            patch.apply(&mut record.meta);
            updated += 1;
        }
        if updated > 0 {
            self.persist(&sessions).await?;
        }
        Ok(updated)
    }

    async fn rotate(&self, old_hash: &str, new_hash: &str, new_expires_at: i64) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(record) = sessions
            .iter_mut()
            .find(|record| record.token_hash == old_hash)
        else {
            return Ok(false);
        };
        record.token_hash = new_hash.to_string();
        record.expires_at = new_expires_at;
        self.persist(&sessions).await?;
        Ok(true)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|record| record.token_hash != token_hash);
        let removed = (before - sessions.len()) as u64;
        if removed > 0 {
            self.persist(&sessions).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.clear();
        self.persist(&sessions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use anyhow::Result;
    use uuid::Uuid;

    fn record(uid: &str, hash: &str) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            uid: uid.to_string(),
            token_hash: hash.to_string(),
            expires_at: i64::MAX,
            meta: Profile {
                uid: uid.to_string(),
                display_name: "Sita".to_string(),
                ..Profile::default()
            },
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn sessions_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sessions.json");

        let backend = FileSessionBackend::open(&path).await?;
        let saved = record("u1", "h1");
        backend.insert(&saved).await?;

        let reopened = FileSessionBackend::open(&path).await?;
        assert_eq!(reopened.find_by_hash("h1").await?, Some(saved));
        Ok(())
    }

    #[tokio::test]
    async fn file_uses_sessions_envelope() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sessions.json");
        let backend = FileSessionBackend::open(&path).await?;
        backend.insert(&record("u1", "h1")).await?;

        let raw: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
        assert_eq!(raw["sessions"][0]["tokenHash"], "h1");
        assert_eq!(raw["sessions"][0]["meta"]["displayName"], "Sita");
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_reset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sessions.json");
        tokio::fs::write(&path, b"{not json").await?;

        let backend = FileSessionBackend::open(&path).await?;
        assert!(backend.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_hash_is_not_inserted_twice() -> Result<()> {
        let backend = FileSessionBackend::in_memory();
        backend.insert(&record("u1", "h1")).await?;
        backend.insert(&record("u2", "h1")).await?;
        assert_eq!(backend.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn clear_empties_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sessions.json");
        let backend = FileSessionBackend::open(&path).await?;
        backend.insert(&record("u1", "h1")).await?;
        backend.clear().await?;

        let reopened = FileSessionBackend::open(&path).await?;
        assert!(reopened.list().await?.is_empty());
        Ok(())
    }
}
