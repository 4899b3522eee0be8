//! In-process document store, used when no durable database is configured and in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    AdminAllowList, ConfigStore, OtpRecord, OtpRepository, UserDirectory, UserDocument,
    ADMINS_DOCUMENT,
};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserDocument>>,
    otps: RwLock<HashMap<String, OtpRecord>>,
    config: RwLock<HashMap<String, Map<String, Value>>>,
    meta: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the admin allow-list.
    ///
    /// # Errors
    /// Returns an error if the list cannot be serialized.
    pub async fn set_admin_allow_list(&self, list: &AdminAllowList) -> Result<()> {
        let value = serde_json::to_value(list).context("failed to serialize admin allow-list")?;
        self.meta
            .write()
            .await
            .insert(ADMINS_DOCUMENT.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserDocument>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn merge_user(&self, uid: &str, patch: &UserDocument) -> Result<()> {
        self.users
            .write()
            .await
            .entry(uid.to_string())
            .or_default()
            .merge(patch);
        Ok(())
    }
}

#[async_trait]
impl OtpRepository for MemoryStore {
    async fn put_otp(&self, email: &str, record: &OtpRecord) -> Result<()> {
        self.otps
            .write()
            .await
            .insert(email.to_string(), record.clone());
        Ok(())
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>> {
        Ok(self.otps.read().await.get(email).cloned())
    }

    async fn delete_otp(&self, email: &str) -> Result<()> {
        self.otps.write().await.remove(email);
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config(&self, name: &str) -> Result<Option<Map<String, Value>>> {
        Ok(self.config.read().await.get(name).cloned())
    }

    async fn merge_config(&self, name: &str, data: &Map<String, Value>) -> Result<()> {
        let mut config = self.config.write().await;
        let doc = config.entry(name.to_string()).or_default();
        for (key, value) in data {
            doc.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn admin_allow_list(&self) -> Result<AdminAllowList> {
        match self.meta.read().await.get(ADMINS_DOCUMENT) {
            Some(value) => serde_json::from_value(value.clone())
                .context("failed to decode admin allow-list"),
            None => Ok(AdminAllowList::default()),
        }
    }
}
