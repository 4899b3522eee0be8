//! Refresh and logout, both driven by the refresh cookie.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    cookies::{clear_refresh_cookie, read_cookie, refresh_cookie, REFRESH_COOKIE_NAME},
    state::AuthState,
    types::{OkResponse, RefreshResponse},
};
use crate::{
    error::{ApiError, ErrorBody},
    session::REFRESH_TTL_MILLIS,
    token::{generate_refresh_token, hash_refresh_token},
};

#[utoipa::path(
    post,
    path = "/api/refresh",
    responses(
        (status = 200, description = "New access token minted from the session snapshot", body = RefreshResponse),
        (status = 401, description = "Missing, unknown or expired refresh token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(raw) = read_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return ApiError::Unauthorized("Missing refresh token".to_string()).into_response();
    };

    // Only the hash is stored; never look up by the raw value.
    let token_hash = hash_refresh_token(&raw);
    let Some(session) = auth_state.sessions().find_by_hash(&token_hash).await else {
        return ApiError::Unauthorized("Invalid refresh token".to_string()).into_response();
    };
    if session.is_expired_at(crate::now_millis()) {
        debug!(session_id = %session.id, "Refresh token expired");
        return ApiError::Unauthorized("Invalid refresh token".to_string()).into_response();
    }

    let token = match auth_state.tokens().issue(&session.meta) {
        Ok(token) => token,
        Err(err) => {
            error!(uid = %session.uid, "Failed to sign access token: {err}");
            return ApiError::Internal("Failed to issue token".to_string()).into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    if auth_state.config().rotate_refresh_tokens() {
        let (next_raw, next_hash) = match generate_refresh_token() {
            Ok(pair) => pair,
            Err(err) => {
                error!("Failed to generate refresh token: {err:#}");
                return ApiError::Internal("Failed to issue token".to_string()).into_response();
            }
        };
        let rotated = auth_state
            .sessions()
            .rotate(&token_hash, &next_hash, crate::now_millis() + REFRESH_TTL_MILLIS)
            .await;
        if !rotated {
            // Revoked between lookup and rotation.
            warn!(session_id = %session.id, "Refresh token rotation found no session");
            return ApiError::Unauthorized("Invalid refresh token".to_string()).into_response();
        }
        match refresh_cookie(auth_state.config(), &next_raw) {
            Ok(cookie) => {
                response_headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => {
                error!("Failed to build refresh cookie: {err}");
                return ApiError::Internal("Failed to issue token".to_string()).into_response();
            }
        }
    }

    (StatusCode::OK, response_headers, Json(RefreshResponse { token })).into_response()
}

#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 200, description = "Session removed (if any) and cookie cleared", body = OkResponse)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(raw) = read_cookie(&headers, REFRESH_COOKIE_NAME) {
        auth_state
            .sessions()
            .delete_by_hash(&hash_refresh_token(&raw))
            .await;
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    match clear_refresh_cookie(auth_state.config()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build refresh cookie: {err}"),
    }
    (StatusCode::OK, response_headers, Json(OkResponse { ok: true }))
}
