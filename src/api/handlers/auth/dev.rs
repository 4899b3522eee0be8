//! Development-only impersonation. The route is not mounted in production.

use axum::{extract::Extension, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::warn;

use super::{
    issue::establish_session,
    state::AuthState,
    types::{ImpersonateRequest, ImpersonatedUser, TokenResponse},
};
use crate::{
    error::{ApiError, ErrorBody},
    profile::IdentityClaim,
};

impl From<ImpersonatedUser> for IdentityClaim {
    fn from(user: ImpersonatedUser) -> Self {
        Self {
            uid: user.uid,
            email: user.email,
            display_name: user.display_name,
            email_verified: user.email_verified,
            photo_url: user.photo_url.filter(|url| !url.is_empty()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/__dev/impersonate",
    request_body = ImpersonateRequest,
    responses(
        (status = 200, description = "Session issued for the given user", body = TokenResponse),
        (status = 400, description = "Missing user object with uid", body = ErrorBody)
    ),
    tag = "dev"
)]
pub async fn impersonate(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ImpersonateRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let user = request.user.unwrap_or(request.bare);
    if user.uid.trim().is_empty() {
        return ApiError::BadRequest("Missing user object with uid".to_string()).into_response();
    }

    warn!(uid = %user.uid, "Impersonating user (development only)");
    match establish_session(&auth_state, &IdentityClaim::from(user)).await {
        Ok(issued) => issued.into_response(),
        Err(err) => err.into_response(),
    }
}
