//! Access-token signing and refresh-token generation.

use anyhow::{Context, Result};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::profile::Profile;

/// 15 minutes.
pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const REFRESH_TOKEN_BYTES: usize = 64;
const JTI_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret is empty")]
    MissingSecret,
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("failed to generate token id: {0}")]
    Entropy(#[source] rand::Error),
}

/// Access-token payload: the profile plus the standard claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(flatten)]
    pub profile: Profile,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer with a fixed 15 minute lifetime.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// # Errors
    /// Returns [`TokenError::MissingSecret`] when the secret is empty.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        let secret = secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(TokenError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// # Errors
    /// Returns an error if randomness or signing fails.
    pub fn issue(&self, profile: &Profile) -> Result<String, TokenError> {
        self.issue_at(profile, chrono::Utc::now().timestamp())
    }

    /// Sign with an explicit issued-at (seconds).
    ///
    /// # Errors
    /// Returns an error if randomness or signing fails.
    pub fn issue_at(&self, profile: &Profile, issued_at: i64) -> Result<String, TokenError> {
        let mut jti = [0u8; JTI_BYTES];
        OsRng.try_fill_bytes(&mut jti).map_err(TokenError::Entropy)?;

        let claims = AccessClaims {
            profile: profile.clone(),
            jti: hex::encode(jti),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Signing)
    }

    /// # Errors
    /// Returns [`TokenError::Expired`] past `exp` and [`TokenError::Invalid`] for anything else.
    pub fn verify_claims(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    /// # Errors
    /// See [`TokenIssuer::verify_claims`].
    pub fn verify(&self, token: &str) -> Result<Profile, TokenError> {
        self.verify_claims(token).map(|claims| claims.profile)
    }
}

/// Generate a refresh token: `(raw, hash)`. Only the raw value goes to the client, only the
/// hash is stored.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_refresh_token() -> Result<(String, String)> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    let raw = hex::encode(bytes);
    let hash = hash_refresh_token(&raw);
    Ok((raw, hash))
}

/// Hex SHA-256 of the raw refresh token.
#[must_use]
pub fn hash_refresh_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashSet;

    fn issuer() -> Result<TokenIssuer> {
        Ok(TokenIssuer::new(&SecretString::from("test-secret"))?)
    }

    fn profile() -> Profile {
        Profile {
            uid: "u1".to_string(),
            email: "u1@hck.edu".to_string(),
            display_name: "Sita".to_string(),
            email_verified: true,
            is_verified: true,
            photo_url: Some("https://img/p.png".to_string()),
            photo_url_proxy: Some("http://localhost:4000/api/avatar/u1.svg".to_string()),
            student_id: Some("S1".to_string()),
            department: Some("Computing".to_string()),
            year: Some("2".to_string()),
        }
    }

    #[test]
    fn round_trip_preserves_profile() -> Result<()> {
        let issuer = issuer()?;
        let token = issuer.issue(&profile())?;
        let claims = issuer.verify_claims(&token)?;
        assert_eq!(claims.profile, profile());
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECONDS);
        assert_eq!(claims.jti.len(), JTI_BYTES * 2);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<()> {
        let issuer = issuer()?;
        // exp = now - 1s
        let issued_at = chrono::Utc::now().timestamp() - ACCESS_TOKEN_TTL_SECONDS - 1;
        let token = issuer.issue_at(&profile(), issued_at)?;
        assert!(matches!(issuer.verify(&token), Err(TokenError::Expired)));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_rejected() -> Result<()> {
        let token = issuer()?.issue(&profile())?;
        let other = TokenIssuer::new(&SecretString::from("another-secret"))?;
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid)));
        assert!(matches!(other.verify("not.a.jwt"), Err(TokenError::Invalid)));
        Ok(())
    }

    #[test]
    fn same_profile_differs_by_jti() -> Result<()> {
        let issuer = issuer()?;
        let now = chrono::Utc::now().timestamp();
        let first = issuer.issue_at(&profile(), now)?;
        let second = issuer.issue_at(&profile(), now)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(matches!(
            TokenIssuer::new(&SecretString::from("  ")),
            Err(TokenError::MissingSecret)
        ));
    }

    #[test]
    fn refresh_token_shape() -> Result<()> {
        let (raw, hash) = generate_refresh_token()?;
        assert_eq!(raw.len(), REFRESH_TOKEN_BYTES * 2);
        assert_eq!(hash.len(), 64);
        assert_ne!(raw, hash);
        assert_eq!(hash, hash_refresh_token(&raw));
        Ok(())
    }

    #[test]
    fn refresh_token_hashes_do_not_collide() -> Result<()> {
        let mut hashes = HashSet::new();
        for _ in 0..10_000 {
            let (_, hash) = generate_refresh_token()?;
            assert!(hashes.insert(hash));
        }
        Ok(())
    }
}
