//! Server-side Google OAuth: start (consent redirect) and callback.
//!
//! The `state` parameter is `base64url(JSON{nonce, redirectTo}) "." hex(HMAC-SHA256)`,
//! keyed with the access-token secret. The nonce is also stored in a five minute
//! `oauth_state` cookie, so a callback must present both halves to be accepted.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Query},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    cookies::{
        clear_oauth_state_cookie, oauth_state_cookie, read_cookie, OAUTH_STATE_COOKIE_NAME,
    },
    issue::establish_session,
    state::AuthState,
    types::{OAuthCallbackQuery, OAuthStartQuery},
};
use crate::error::{ApiError, ErrorBody};

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OAuthState {
    pub(crate) nonce: String,
    pub(crate) redirect_to: String,
}

fn state_mac(secret: &SecretString) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .context("failed to initialize state signer")
}

pub(crate) fn generate_nonce() -> Result<String> {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate oauth nonce")?;
    Ok(hex::encode(bytes))
}

pub(crate) fn sign_state(secret: &SecretString, state: &OAuthState) -> Result<String> {
    let json = serde_json::to_vec(state).context("failed to serialize oauth state")?;
    let payload = Base64UrlUnpadded::encode_string(&json);
    let mut mac = state_mac(secret)?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{payload}.{signature}"))
}

/// `None` for anything malformed or not signed with `secret`.
pub(crate) fn verify_state(secret: &SecretString, raw: &str) -> Option<OAuthState> {
    let (payload, signature) = raw.split_once('.')?;
    let signature = hex::decode(signature).ok()?;
    let mut mac = state_mac(secret).ok()?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).ok()?;

    let json = Base64UrlUnpadded::decode_vec(payload).ok()?;
    serde_json::from_slice(&json).ok()
}

#[utoipa::path(
    get,
    path = "/api/oauth/google/start",
    params(
        ("redirect" = Option<String>, Query, description = "Where to land after login; same-site path or allowed origin"),
        ("login_hint" = Option<String>, Query, description = "Email to preselect on the consent screen")
    ),
    responses(
        (status = 302, description = "Redirect to the consent screen; sets oauth_state"),
        (status = 400, description = "Invalid redirect", body = ErrorBody),
        (status = 503, description = "Google OAuth not configured", body = ErrorBody)
    ),
    tag = "oauth"
)]
pub async fn oauth_start(
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<OAuthStartQuery>,
) -> impl IntoResponse {
    let Some(google) = auth_state.google() else {
        return ApiError::NotConfigured("Google OAuth not configured on server".to_string())
            .into_response();
    };

    let redirect_to = query
        .redirect
        .filter(|redirect| !redirect.is_empty())
        .unwrap_or_else(|| "/".to_string());
    if !auth_state.config().redirect_allowed(&redirect_to) {
        return ApiError::BadRequest("Invalid redirect".to_string()).into_response();
    }

    let result = (|| -> Result<(HeaderValue, HeaderValue)> {
        let nonce = generate_nonce()?;
        let state = sign_state(
            auth_state.config().jwt_secret(),
            &OAuthState {
                nonce: nonce.clone(),
                redirect_to,
            },
        )?;
        let url = google.authorize_url(&state, query.login_hint.as_deref())?;
        let location = HeaderValue::from_str(url.as_str()).context("invalid consent URL")?;
        let cookie = oauth_state_cookie(auth_state.config(), &nonce)
            .context("invalid oauth_state cookie")?;
        Ok((location, cookie))
    })();

    match result {
        Ok((location, cookie)) => {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, location);
            headers.insert(SET_COOKIE, cookie);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => {
            error!("Failed to start OAuth flow: {err:#}");
            ApiError::Internal("OAuth error".to_string()).into_response()
        }
    }
}

/// `access_token=..&firebase_custom_token=..`, custom token only when minted.
fn token_fragment(access_token: &str, custom_token: Option<&str>) -> String {
    let mut fragment = url::form_urlencoded::Serializer::new(String::new());
    fragment.append_pair("access_token", access_token);
    if let Some(custom_token) = custom_token {
        fragment.append_pair("firebase_custom_token", custom_token);
    }
    fragment.finish()
}

#[utoipa::path(
    get,
    path = "/api/oauth/google/callback",
    params(
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "Signed state from the start endpoint")
    ),
    responses(
        (status = 302, description = "Redirect to the app with tokens in the URL fragment"),
        (status = 400, description = "Missing code/state, bad signature or nonce mismatch", body = ErrorBody),
        (status = 502, description = "Provider exchange failed", body = ErrorBody),
        (status = 503, description = "Google OAuth not configured", body = ErrorBody)
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<OAuthCallbackQuery>,
) -> impl IntoResponse {
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return ApiError::BadRequest("Missing code".to_string()).into_response();
    };
    let Some(raw_state) = query.state.filter(|state| !state.is_empty()) else {
        return ApiError::BadRequest("Missing state".to_string()).into_response();
    };
    let Some(state) = verify_state(auth_state.config().jwt_secret(), &raw_state) else {
        return ApiError::BadRequest("Invalid state".to_string()).into_response();
    };
    if read_cookie(&headers, OAUTH_STATE_COOKIE_NAME).as_deref() != Some(state.nonce.as_str()) {
        return ApiError::BadRequest("Invalid state or expired".to_string()).into_response();
    }
    let Some(google) = auth_state.google() else {
        return ApiError::NotConfigured("Google OAuth not configured on server".to_string())
            .into_response();
    };

    let user_info = match google.exchange_code(&code).await {
        Ok(user_info) => user_info,
        Err(err) => {
            error!("OAuth code exchange failed: {err:#}");
            return ApiError::UpstreamUnavailable("OAuth error".to_string()).into_response();
        }
    };

    let claim = user_info.into_claim();
    let issued = match establish_session(&auth_state, &claim).await {
        Ok(issued) => issued,
        Err(err) => return err.into_response(),
    };

    let mut custom_claims = Map::new();
    custom_claims.insert("provider".to_string(), json!("google"));
    custom_claims.insert("email".to_string(), Value::String(issued.user.email.clone()));
    let custom_token = match auth_state
        .identity()
        .mint_custom_token(&issued.user.uid, &custom_claims)
    {
        Ok(token) => {
            info!(uid = %issued.user.uid, "Created provider custom token");
            Some(token)
        }
        Err(err) => {
            warn!(uid = %issued.user.uid, "Failed to create provider custom token: {err}");
            None
        }
    };

    let location = format!(
        "{}#{}",
        state.redirect_to,
        token_fragment(&issued.token, custom_token.as_deref())
    );
    let Ok(location) = HeaderValue::from_str(&location) else {
        error!("OAuth redirect target is not a valid header value");
        return ApiError::Internal("OAuth error".to_string()).into_response();
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(LOCATION, location);
    response_headers.append(SET_COOKIE, issued.refresh_cookie);
    if let Ok(cookie) = clear_oauth_state_cookie(auth_state.config()) {
        response_headers.append(SET_COOKIE, cookie);
    }
    (StatusCode::FOUND, response_headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("oauth-secret")
    }

    fn sample() -> OAuthState {
        OAuthState {
            nonce: "n1".to_string(),
            redirect_to: "http://localhost:5173/after".to_string(),
        }
    }

    #[test]
    fn signed_state_verifies() -> Result<()> {
        let raw = sign_state(&secret(), &sample())?;
        assert_eq!(verify_state(&secret(), &raw), Some(sample()));
        Ok(())
    }

    #[test]
    fn tampered_or_foreign_state_is_rejected() -> Result<()> {
        let raw = sign_state(&secret(), &sample())?;
        let (payload, signature) = raw.split_once('.').unwrap_or_default();

        let forged = OAuthState {
            redirect_to: "https://evil.example".to_string(),
            ..sample()
        };
        let forged_payload = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&forged)?);
        assert_eq!(verify_state(&secret(), &format!("{forged_payload}.{signature}")), None);

        assert_eq!(verify_state(&SecretString::from("other"), &raw), None);
        assert_eq!(verify_state(&secret(), payload), None);
        assert_eq!(verify_state(&secret(), "not-base64.zz"), None);
        Ok(())
    }

    #[test]
    fn nonce_is_random_hex() -> Result<()> {
        let first = generate_nonce()?;
        assert_eq!(first.len(), NONCE_BYTES * 2);
        assert_ne!(first, generate_nonce()?);
        Ok(())
    }

    #[test]
    fn fragment_omits_missing_custom_token() {
        assert_eq!(token_fragment("a.b.c", None), "access_token=a.b.c");
        assert_eq!(
            token_fragment("a.b.c", Some("x.y")),
            "access_token=a.b.c&firebase_custom_token=x.y"
        );
    }
}
