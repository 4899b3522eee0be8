//! Profile snapshot and the reconciliation pipeline shared by every login path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use utoipa::ToSchema;

use crate::session::SessionStore;
use crate::store::{UserDirectory, UserDocument};

/// What the service knows about a user at one point in time.
///
/// This is both the access-token payload and the `meta` of every session record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    /// Provider claim.
    #[serde(default)]
    pub email_verified: bool,
    /// Application-level flag, only ever set by OTP verification.
    #[serde(default)]
    pub is_verified: bool,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(rename = "photoURLProxy", default, skip_serializing_if = "Option::is_none")]
    pub photo_url_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl Profile {
    /// Overlay a previously persisted snapshot. Present fields win, `isVerified` never regresses.
    pub fn overlay_meta(&mut self, meta: &Self) {
        if !meta.uid.is_empty() {
            self.uid.clone_from(&meta.uid);
        }
        self.email.clone_from(&meta.email);
        self.display_name.clone_from(&meta.display_name);
        self.email_verified = meta.email_verified;
        self.is_verified = self.is_verified || meta.is_verified;
        overlay_option(&mut self.photo_url, &meta.photo_url);
        overlay_option(&mut self.photo_url_proxy, &meta.photo_url_proxy);
        overlay_option(&mut self.student_id, &meta.student_id);
        overlay_option(&mut self.department, &meta.department);
        overlay_option(&mut self.year, &meta.year);
    }

    /// Overlay the authoritative fields of the user document.
    pub fn overlay_user_document(&mut self, doc: &UserDocument) {
        overlay_non_empty(&mut self.photo_url, doc.photo_url.as_deref());
        if let Some(name) = doc.display_name.as_deref().filter(|name| !name.is_empty()) {
            self.display_name = name.to_string();
        }
        if doc.is_verified == Some(true) {
            self.is_verified = true;
        }
        overlay_non_empty(&mut self.student_id, doc.student_id.as_deref());
        overlay_non_empty(&mut self.department, doc.department.as_deref());
        overlay_non_empty(&mut self.year, doc.year.as_deref());
    }
}

fn overlay_option(target: &mut Option<String>, source: &Option<String>) {
    if source.is_some() {
        target.clone_from(source);
    }
}

fn overlay_non_empty(target: &mut Option<String>, source: Option<&str>) {
    if let Some(value) = source.filter(|value| !value.is_empty()) {
        *target = Some(value.to_string());
    }
}

/// Raw identity produced by a login entry point before reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityClaim {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
    pub photo_url: Option<String>,
}

impl IdentityClaim {
    #[must_use]
    pub fn seed(&self) -> Profile {
        Profile {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            email_verified: self.email_verified,
            is_verified: false,
            photo_url: self.photo_url.clone().filter(|url| !url.is_empty()),
            ..Profile::default()
        }
    }
}

/// `true` for avatar values that embed generated images or point at the upstream avatar API.
#[must_use]
pub fn is_generated_avatar(photo_url: &str) -> bool {
    photo_url.starts_with("data:image/svg+xml")
        || photo_url.starts_with("blob:")
        || photo_url.contains("abstractapi.com")
        || photo_url.contains("/api/avatar/abstract")
}

/// `<base>/api/avatar/<uid>.svg`
#[must_use]
pub fn avatar_proxy_url(base: &Url, uid: &str) -> String {
    let file = format!("{uid}.svg");
    join_segments(base, &["api", "avatar", &file])
}

/// `<base>/api/avatar/abstract/<uid>`
#[must_use]
pub fn abstract_avatar_url(base: &Url, uid: &str) -> String {
    join_segments(base, &["api", "avatar", "abstract", uid])
}

fn join_segments(base: &Url, segments: &[&str]) -> String {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url.to_string()
}

/// Replace generated or third-party avatar values with the internal proxy URL.
#[must_use]
pub fn canonicalize_photo_url(base: &Url, uid: &str, photo_url: Option<String>) -> Option<String> {
    match photo_url {
        Some(url) if is_generated_avatar(&url) => Some(abstract_avatar_url(base, uid)),
        other => other,
    }
}

/// Builds the canonical profile for a login from the claim, the latest session and the
/// user document, in that order of increasing precedence.
pub struct ProfileReconciler {
    public_url: Url,
    sessions: Arc<SessionStore>,
    users: Arc<dyn UserDirectory>,
}

impl ProfileReconciler {
    pub fn new(public_url: Url, sessions: Arc<SessionStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            public_url,
            sessions,
            users,
        }
    }

    #[must_use]
    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    /// Never fails: lookup errors are logged and the profile degrades to what was assembled.
    pub async fn reconcile(&self, claim: &IdentityClaim) -> Profile {
        let mut profile = claim.seed();

        // Independent reads.
        let (latest, user_doc) = tokio::join!(
            self.sessions.latest_for_uid(&claim.uid),
            self.users.get_user(&claim.uid)
        );

        if let Some(session) = latest {
            debug!(uid = %claim.uid, session_id = %session.id, "overlaying latest session meta");
            profile.overlay_meta(&session.meta);
        }

        match user_doc {
            Ok(Some(doc)) => profile.overlay_user_document(&doc),
            Ok(None) => {}
            Err(err) => warn!(uid = %claim.uid, "Failed to load user document: {err:#}"),
        }

        self.finish(profile)
    }

    /// Canonicalize the avatar and attach the proxy URL.
    #[must_use]
    pub fn finish(&self, mut profile: Profile) -> Profile {
        profile.photo_url = canonicalize_photo_url(&self.public_url, &profile.uid, profile.photo_url);
        profile.photo_url_proxy = Some(avatar_proxy_url(&self.public_url, &profile.uid));
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FileSessionBackend, NewSession};
    use crate::store::MemoryStore;
    use anyhow::Result;

    fn base() -> Result<Url> {
        Ok(Url::parse("https://api.hck.edu/")?)
    }

    fn claim(name: &str) -> IdentityClaim {
        IdentityClaim {
            uid: "u1".to_string(),
            email: "u1@hck.edu".to_string(),
            display_name: name.to_string(),
            email_verified: true,
            photo_url: None,
        }
    }

    async fn reconciler_with(
        meta_name: Option<&str>,
        doc_name: Option<&str>,
    ) -> Result<ProfileReconciler> {
        let sessions = Arc::new(SessionStore::fallback_only(Arc::new(
            FileSessionBackend::in_memory(),
        )));
        let users = Arc::new(MemoryStore::new());

        if let Some(name) = meta_name {
            let meta = Profile {
                uid: "u1".to_string(),
                email: "u1@hck.edu".to_string(),
                display_name: name.to_string(),
                student_id: Some("S-42".to_string()),
                ..Profile::default()
            };
            sessions
                .create(NewSession {
                    uid: "u1".to_string(),
                    token_hash: "h1".to_string(),
                    expires_at: i64::MAX,
                    meta,
                })
                .await;
        }
        if let Some(name) = doc_name {
            let doc = UserDocument {
                display_name: Some(name.to_string()),
                ..UserDocument::default()
            };
            users.merge_user("u1", &doc).await?;
        }

        Ok(ProfileReconciler::new(base()?, sessions, users))
    }

    #[tokio::test]
    async fn user_document_name_wins_over_session_meta() -> Result<()> {
        let reconciler = reconciler_with(Some("B"), Some("C")).await?;
        let profile = reconciler.reconcile(&claim("A")).await;
        assert_eq!(profile.display_name, "C");
        // Fields the provider does not carry are restored from the session.
        assert_eq!(profile.student_id.as_deref(), Some("S-42"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_user_document_name_falls_back_to_session_meta() -> Result<()> {
        let reconciler = reconciler_with(Some("B"), Some("")).await?;
        let profile = reconciler.reconcile(&claim("A")).await;
        assert_eq!(profile.display_name, "B");
        Ok(())
    }

    #[tokio::test]
    async fn claim_is_used_when_nothing_is_persisted() -> Result<()> {
        let reconciler = reconciler_with(None, None).await?;
        let profile = reconciler.reconcile(&claim("A")).await;
        assert_eq!(profile.display_name, "A");
        assert!(profile.email_verified);
        assert!(!profile.is_verified);
        assert_eq!(
            profile.photo_url_proxy.as_deref(),
            Some("https://api.hck.edu/api/avatar/u1.svg")
        );
        Ok(())
    }

    #[test]
    fn user_document_cannot_clear_verified_flag() {
        let mut profile = Profile {
            is_verified: true,
            ..Profile::default()
        };
        profile.overlay_user_document(&UserDocument {
            is_verified: Some(false),
            ..UserDocument::default()
        });
        assert!(profile.is_verified);
    }

    #[test]
    fn session_meta_cannot_clear_verified_flag() {
        let mut profile = Profile {
            is_verified: true,
            ..Profile::default()
        };
        profile.overlay_meta(&Profile::default());
        assert!(profile.is_verified);
    }

    #[test]
    fn generated_avatars_are_canonicalized() -> Result<()> {
        let base = base()?;
        for photo in [
            "data:image/svg+xml;base64,PHN2Zz4=",
            "blob:https://app.hck.edu/123",
            "https://avatars.abstractapi.com/v1/?api_key=SECRET&name=x",
            "https://api.hck.edu/api/avatar/abstract/old",
        ] {
            let canonical = canonicalize_photo_url(&base, "u1", Some(photo.to_string()));
            assert_eq!(
                canonical.as_deref(),
                Some("https://api.hck.edu/api/avatar/abstract/u1")
            );
        }

        let kept = canonicalize_photo_url(
            &base,
            "u1",
            Some("https://lh3.googleusercontent.com/a/pic".to_string()),
        );
        assert_eq!(kept.as_deref(), Some("https://lh3.googleusercontent.com/a/pic"));
        Ok(())
    }

    #[test]
    fn proxy_url_encodes_uid() -> Result<()> {
        let base = Url::parse("http://localhost:4000")?;
        assert_eq!(
            avatar_proxy_url(&base, "google:123/x"),
            "http://localhost:4000/api/avatar/google:123%2Fx.svg"
        );
        Ok(())
    }

    #[test]
    fn proxy_url_keeps_base_path() -> Result<()> {
        let base = Url::parse("https://hck.edu/backend/")?;
        assert_eq!(
            avatar_proxy_url(&base, "u1"),
            "https://hck.edu/backend/api/avatar/u1.svg"
        );
        Ok(())
    }

    #[test]
    fn profile_serializes_camel_case() -> Result<()> {
        let profile = Profile {
            uid: "u1".to_string(),
            photo_url: Some("p".to_string()),
            ..Profile::default()
        };
        let value = serde_json::to_value(&profile)?;
        assert_eq!(value["displayName"], "");
        assert_eq!(value["photoURL"], "p");
        assert!(value.get("photoURLProxy").is_none());
        assert_eq!(value["isVerified"], false);
        Ok(())
    }
}
