//! Password and identity-token login.

use axum::{extract::Extension, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    issue::establish_session,
    state::AuthState,
    types::{LoginRequest, TokenLoginRequest, TokenResponse},
};
use crate::{
    error::{ApiError, ErrorBody},
    identity::IdentityError,
    profile::IdentityClaim,
};

const INVALID_LOGIN: &str = "Invalid email or password";

/// `dev:<email>` identity used when no provider key is configured outside production.
pub(crate) fn dev_claim(email: &str) -> IdentityClaim {
    let local_part = email.split('@').next().unwrap_or_default();
    IdentityClaim {
        uid: format!("dev:{email}"),
        email: email.to_string(),
        display_name: local_part.to_string(),
        email_verified: false,
        photo_url: None,
    }
}

#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; refresh cookie set", body = TokenResponse),
        (status = 400, description = "Missing email or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 500, description = "Provider not configured", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let email = request.email.trim();
    if email.is_empty() || request.password.is_empty() {
        return ApiError::BadRequest("Missing email or password".to_string()).into_response();
    }

    let claim = if auth_state.identity().supports_password_sign_in() {
        match auth_state
            .identity()
            .sign_in_with_password(email, &request.password)
            .await
        {
            Ok(identity) => IdentityClaim::from(identity),
            Err(IdentityError::InvalidCredentials | IdentityError::InvalidToken(_)) => {
                return ApiError::InvalidCredentials(INVALID_LOGIN.to_string()).into_response();
            }
            Err(IdentityError::NotConfigured(what)) => {
                error!("Password login unavailable: {what} not configured");
                return ApiError::Configuration("Server configuration error".to_string())
                    .into_response();
            }
            Err(err @ IdentityError::Unavailable(_)) => {
                error!("Password login failed: {err}");
                return ApiError::UpstreamUnavailable("Login failed".to_string()).into_response();
            }
        }
    } else if request.dev && !auth_state.config().production() {
        warn!(email, "Development login used, no identity provider key configured");
        dev_claim(email)
    } else {
        error!("Password login requested but no identity provider API key is configured");
        return ApiError::Configuration(
            "Server configuration error: missing identity provider API key".to_string(),
        )
        .into_response();
    };

    match establish_session(&auth_state, &claim).await {
        Ok(issued) => issued.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/login-token",
    request_body = TokenLoginRequest,
    responses(
        (status = 200, description = "Logged in; refresh cookie set", body = TokenResponse),
        (status = 400, description = "Missing idToken", body = ErrorBody),
        (status = 401, description = "Invalid identity token", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable", body = ErrorBody),
        (status = 503, description = "Identity tokens not configured", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login_token(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TokenLoginRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let id_token = request.id_token.trim();
    if id_token.is_empty() {
        return ApiError::BadRequest("Missing idToken".to_string()).into_response();
    }

    let identity = match auth_state.identity().verify_id_token(id_token).await {
        Ok(identity) => identity,
        Err(IdentityError::InvalidToken(reason)) => {
            warn!("login-token verify failed: {reason}");
            return ApiError::Unauthorized("Invalid identity token".to_string()).into_response();
        }
        Err(IdentityError::InvalidCredentials) => {
            return ApiError::Unauthorized("Invalid identity token".to_string()).into_response();
        }
        Err(IdentityError::NotConfigured(what)) => {
            error!("Identity-token login unavailable: {what} not configured");
            return ApiError::NotConfigured("Identity token login is not configured".to_string())
                .into_response();
        }
        Err(err @ IdentityError::Unavailable(_)) => {
            error!("login-token verify failed: {err}");
            return ApiError::UpstreamUnavailable("Identity provider unavailable".to_string())
                .into_response();
        }
    };

    match establish_session(&auth_state, &IdentityClaim::from(identity)).await {
        Ok(issued) => issued.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_claim_is_derived_from_email() {
        let claim = dev_claim("s@hck.edu");
        assert_eq!(claim.uid, "dev:s@hck.edu");
        assert_eq!(claim.display_name, "s");
        assert!(!claim.email_verified);
    }
}
