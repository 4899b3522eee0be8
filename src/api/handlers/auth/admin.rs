//! Admin authorization for configuration writes.

use axum::http::HeaderMap;
use tracing::{debug, warn};

use super::{cookies::extract_bearer_token, state::AuthState};
use crate::error::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AdminPrincipal {
    pub(crate) uid: String,
    pub(crate) email: String,
}

/// Accept a locally signed access token, or (when enabled) a raw identity-provider token,
/// then check the admin allow-list by uid or email.
pub(crate) async fn require_admin(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<AdminPrincipal, ApiError> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string()))?;

    let principal = match auth_state.tokens().verify(&token) {
        Ok(profile) => AdminPrincipal {
            uid: profile.uid,
            email: profile.email,
        },
        Err(err) if auth_state.config().admin_provider_tokens() => {
            debug!("Access token rejected ({err}), trying identity provider");
            let identity = auth_state
                .identity()
                .verify_id_token(&token)
                .await
                .map_err(|_| ApiError::Unauthorized("Invalid token".to_string()))?;
            AdminPrincipal {
                uid: identity.uid,
                email: identity.email,
            }
        }
        Err(_) => return Err(ApiError::Unauthorized("Invalid token".to_string())),
    };

    let allowed = match auth_state.documents().admin_allow_list().await {
        Ok(list) => list.allows(&principal.uid, &principal.email),
        Err(err) => {
            warn!(uid = %principal.uid, "Admin allow-list lookup failed: {err:#}");
            false
        }
    };

    if allowed {
        Ok(principal)
    } else {
        Err(ApiError::Forbidden("Admin required".to_string()))
    }
}
