//! The one login pipeline every entry point feeds: reconcile, sign, persist, set cookie.

use axum::{
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use super::{cookies::refresh_cookie, state::AuthState, types::TokenResponse};
use crate::{
    error::ApiError,
    profile::{IdentityClaim, Profile},
    session::{NewSession, REFRESH_TTL_MILLIS},
    token::generate_refresh_token,
};

pub(crate) struct IssuedSession {
    pub(crate) token: String,
    pub(crate) user: Profile,
    pub(crate) refresh_cookie: HeaderValue,
}

impl IssuedSession {
    pub(crate) fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, self.refresh_cookie);
        (
            StatusCode::OK,
            headers,
            Json(TokenResponse {
                token: self.token,
                user: self.user,
            }),
        )
            .into_response()
    }
}

/// Turn a raw identity claim into an access token plus a persisted refresh session.
///
/// Session persistence never fails the login; the store masks backend errors itself.
pub(crate) async fn establish_session(
    state: &AuthState,
    claim: &IdentityClaim,
) -> Result<IssuedSession, ApiError> {
    let profile = state.reconciler().reconcile(claim).await;

    let token = state.tokens().issue(&profile).map_err(|err| {
        error!(uid = %profile.uid, "Failed to sign access token: {err}");
        ApiError::Internal("Failed to issue token".to_string())
    })?;

    let (refresh_token, token_hash) = generate_refresh_token().map_err(|err| {
        error!("Failed to generate refresh token: {err:#}");
        ApiError::Internal("Failed to issue token".to_string())
    })?;

    let record = state
        .sessions()
        .create(NewSession {
            uid: profile.uid.clone(),
            token_hash,
            expires_at: crate::now_millis() + REFRESH_TTL_MILLIS,
            meta: profile.clone(),
        })
        .await;

    let refresh_cookie = refresh_cookie(state.config(), &refresh_token).map_err(|err| {
        error!("Failed to build refresh cookie: {err}");
        ApiError::Internal("Failed to issue token".to_string())
    })?;

    info!(uid = %profile.uid, session_id = %record.id, "Session established");

    Ok(IssuedSession {
        token,
        user: profile,
        refresh_cookie,
    })
}
