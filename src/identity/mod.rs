//! Identity-provider capability.
//!
//! The service consumes three things from the provider: verifying an identity token,
//! exchanging email + password, and minting a custom token for the client SDK. The Google
//! OAuth authorization-code client lives next to it because it produces the same kind of
//! identity.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::profile::IdentityClaim;

mod firebase;
mod google;

pub use self::firebase::{FirebaseIdentity, ServiceAccount};
pub use self::google::{GoogleOAuth, GoogleUserInfo};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid identity token: {0}")]
    InvalidToken(String),
    #[error("identity provider unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
}

/// Identity asserted by the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl From<VerifiedIdentity> for IdentityClaim {
    fn from(identity: VerifiedIdentity) -> Self {
        Self {
            uid: identity.uid,
            email: identity.email,
            display_name: identity.name.unwrap_or_default(),
            email_verified: identity.email_verified,
            photo_url: identity.picture,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether email + password exchange is available (an API key is configured).
    fn supports_password_sign_in(&self) -> bool;

    async fn verify_id_token(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<VerifiedIdentity, IdentityError>;

    /// Token the client SDK can exchange for its own provider session.
    fn mint_custom_token(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<String, IdentityError>;
}
