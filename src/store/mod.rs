//! Document capabilities beside sessions: user documents, OTP records and config documents.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

mod memory;
mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

/// Name of the meta document holding the admin allow-list.
pub const ADMINS_DOCUMENT: &str = "admins";

/// Authoritative per-user document. Written by OTP verification and profile edits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl UserDocument {
    /// Field-wise merge: present fields in `patch` win, `isVerified` stays true once set.
    pub fn merge(&mut self, patch: &Self) {
        if patch.photo_url.is_some() {
            self.photo_url.clone_from(&patch.photo_url);
        }
        if patch.display_name.is_some() {
            self.display_name.clone_from(&patch.display_name);
        }
        self.is_verified = match (self.is_verified, patch.is_verified) {
            (Some(true), _) => Some(true),
            (current, None) => current,
            (_, incoming) => incoming,
        };
        if patch.student_id.is_some() {
            self.student_id.clone_from(&patch.student_id);
        }
        if patch.department.is_some() {
            self.department.clone_from(&patch.department);
        }
        if patch.year.is_some() {
            self.year.clone_from(&patch.year);
        }
    }
}

/// One active code per email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRecord {
    pub otp: String,
    pub uid: String,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AdminAllowList {
    #[serde(default)]
    pub uids: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl AdminAllowList {
    #[must_use]
    pub fn allows(&self, uid: &str, email: &str) -> bool {
        (!uid.is_empty() && self.uids.iter().any(|allowed| allowed == uid))
            || (!email.is_empty()
                && self
                    .emails
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(email)))
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<UserDocument>>;
    /// Merge, never overwrite.
    async fn merge_user(&self, uid: &str, patch: &UserDocument) -> Result<()>;
}

#[async_trait]
pub trait OtpRepository: Send + Sync {
    /// Overwrites any previous record for `email`.
    async fn put_otp(&self, email: &str, record: &OtpRecord) -> Result<()>;
    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>>;
    async fn delete_otp(&self, email: &str) -> Result<()>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, name: &str) -> Result<Option<Map<String, Value>>>;
    /// Shallow merge of top-level keys.
    async fn merge_config(&self, name: &str, data: &Map<String, Value>) -> Result<()>;
    /// Missing document means nobody is an admin.
    async fn admin_allow_list(&self) -> Result<AdminAllowList>;
}

/// Everything the handlers need from the document store.
pub trait DocumentStore: UserDirectory + OtpRepository + ConfigStore {}

impl<T: UserDirectory + OtpRepository + ConfigStore> DocumentStore for T {}
