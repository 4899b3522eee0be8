//! Bearer-authenticated profile read and update.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    cookies::extract_bearer_token,
    state::AuthState,
    types::{ProfileUpdateRequest, TokenResponse, UserResponse},
};
use crate::{
    error::{ApiError, ErrorBody},
    profile::{canonicalize_photo_url, Profile},
    session::MetaPatch,
    store::UserDocument,
};

/// Resolve the bearer access token into the profile it carries.
pub(crate) fn require_user(headers: &HeaderMap, auth_state: &AuthState) -> Result<Profile, ApiError> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string()))?;
    auth_state
        .tokens()
        .verify(&token)
        .map_err(|_| ApiError::Unauthorized("Invalid token".to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Only non-empty fields are written; the avatar is canonicalized first.
fn build_patch(auth_state: &AuthState, uid: &str, request: ProfileUpdateRequest) -> MetaPatch {
    let photo_url = canonicalize_photo_url(
        auth_state.config().public_url(),
        uid,
        non_empty(request.photo_url),
    );
    MetaPatch {
        display_name: non_empty(request.display_name),
        photo_url,
        is_verified: None,
        student_id: non_empty(request.student_id),
        department: non_empty(request.department),
        year: non_empty(request.year),
    }
}

#[utoipa::path(
    get,
    path = "/api/profile",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Profile carried by the access token", body = UserResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    ),
    tag = "profile"
)]
pub async fn get_profile(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let mut user = match require_user(&headers, &auth_state) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    // Clients display the proxy so they never hit third-party image hosts directly.
    if let Some(proxy) = user.photo_url_proxy.clone() {
        user.photo_url = Some(proxy);
    }
    (StatusCode::OK, Json(UserResponse { user })).into_response()
}

#[utoipa::path(
    post,
    path = "/api/profile",
    request_body = ProfileUpdateRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Profile updated; fresh access token", body = TokenResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 500, description = "Failed to update session meta", body = ErrorBody)
    ),
    tag = "profile"
)]
pub async fn update_profile(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ProfileUpdateRequest>>,
) -> impl IntoResponse {
    let current = match require_user(&headers, &auth_state) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    if current.uid.is_empty() {
        return ApiError::BadRequest("Missing user in token".to_string()).into_response();
    }

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let patch = build_patch(&auth_state, &current.uid, request);

    let document = UserDocument {
        photo_url: patch.photo_url.clone(),
        display_name: patch.display_name.clone(),
        is_verified: None,
        student_id: patch.student_id.clone(),
        department: patch.department.clone(),
        year: patch.year.clone(),
    };
    if let Err(err) = auth_state.users().merge_user(&current.uid, &document).await {
        error!(uid = %current.uid, "Failed to update user document: {err:#}");
        return ApiError::Internal("Failed to update session meta".to_string()).into_response();
    }

    // Concurrent updates from several devices race here; the last write wins.
    match auth_state
        .sessions()
        .merge_meta_for_uid(&current.uid, &patch)
        .await
    {
        Ok(updated) => info!(uid = %current.uid, updated, "Profile updated"),
        Err(err) => {
            error!(uid = %current.uid, "Failed to update session meta: {err:#}");
            return ApiError::Internal("Failed to update session meta".to_string())
                .into_response();
        }
    }

    let mut user = current;
    patch.apply(&mut user);
    let user = auth_state.reconciler().finish(user);

    match auth_state.tokens().issue(&user) {
        Ok(token) => (StatusCode::OK, Json(TokenResponse { token, user })).into_response(),
        Err(err) => {
            error!(uid = %user.uid, "Failed to sign access token: {err}");
            ApiError::Internal("Failed to issue token".to_string()).into_response()
        }
    }
}
