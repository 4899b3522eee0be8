//! Avatar proxies. Keeps the avatar API key server-side and gives clients a stable
//! same-origin image URL per user. Only the configured avatar provider is ever fetched;
//! user-supplied photo URLs are never followed.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument};
use url::Url;
use utoipa::ToSchema;

use super::auth::AuthState;
use crate::error::ApiError;

const DEFAULT_CONTENT_TYPE: &str = "image/png";
const AVATAR_CACHE_CONTROL: &str = "public, max-age=31536000";
const HEALTHCHECK_SEED: &str = "healthcheck";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AvatarHealth {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Image {
    content_type: String,
    bytes: Bytes,
}

impl Image {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&self.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(AVATAR_CACHE_CONTROL));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        (StatusCode::OK, headers, self.bytes).into_response()
    }
}

/// Failure talking to the avatar provider, with its status when it answered.
#[derive(Debug)]
enum ProviderError {
    NotConfigured,
    Upstream {
        status: Option<u16>,
        source: anyhow::Error,
    },
}

fn abstract_request_url(endpoint: &str, api_key: &str, seed: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).context("invalid avatar endpoint")?;
    url.query_pairs_mut()
        .append_pair("api_key", api_key)
        .append_pair("name", seed);
    Ok(url)
}

async fn fetch_image(auth_state: &AuthState, url: Url) -> Result<Image, ProviderError> {
    let host = url.host_str().unwrap_or_default().to_string();
    let span = info_span!("avatar.fetch", http.method = "GET", host = %host);
    async {
        let response = auth_state
            .http()
            .get(url)
            .send()
            .await
            .map_err(|err| ProviderError::Upstream {
                status: None,
                source: err.into(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Upstream {
                status: Some(status.as_u16()),
                source: anyhow!("avatar provider returned {status}"),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or_else(|| DEFAULT_CONTENT_TYPE.to_string(), str::to_string);
        let bytes = response.bytes().await.map_err(|err| ProviderError::Upstream {
            status: Some(status.as_u16()),
            source: err.into(),
        })?;
        Ok(Image {
            content_type,
            bytes,
        })
    }
    .instrument(span)
    .await
}

async fn fetch_abstract(auth_state: &AuthState, seed: &str) -> Result<Image, ProviderError> {
    let Some(key) = auth_state.config().abstract_api_key() else {
        return Err(ProviderError::NotConfigured);
    };
    let url = abstract_request_url(auth_state.config().avatar_endpoint(), key.expose_secret(), seed)
        .map_err(|source| ProviderError::Upstream {
            status: None,
            source,
        })?;
    fetch_image(auth_state, url).await
}

fn provider_failure(err: ProviderError) -> Response {
    match err {
        ProviderError::NotConfigured => {
            error!("Avatar provider key not configured");
            ApiError::Configuration("Avatar provider key not configured on server".to_string())
                .into_response()
        }
        ProviderError::Upstream { status, source } => {
            error!(provider_status = ?status, "Failed to proxy avatar: {source:#}");
            ApiError::UpstreamUnavailable("Failed to fetch avatar".to_string()).into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/avatar/abstract/{seed}",
    params(
        ("seed" = String, Path, description = "Name the generated avatar is derived from")
    ),
    responses(
        (status = 200, description = "Avatar image", content_type = "image/png"),
        (status = 500, description = "Avatar provider key not configured"),
        (status = 502, description = "Avatar provider failed")
    ),
    tag = "avatar"
)]
pub async fn abstract_avatar(
    auth_state: Extension<Arc<AuthState>>,
    Path(seed): Path<String>,
) -> impl IntoResponse {
    match fetch_abstract(&auth_state, &seed).await {
        Ok(image) => image.into_response(),
        Err(err) => provider_failure(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/avatar/{file}",
    params(
        ("file" = String, Path, description = "`<uid>.svg`")
    ),
    responses(
        (status = 200, description = "Generated avatar for the user", content_type = "image/png"),
        (status = 404, description = "Not an avatar file"),
        (status = 500, description = "Avatar provider key not configured"),
        (status = 502, description = "Avatar provider failed")
    ),
    tag = "avatar"
)]
pub async fn avatar_file(
    auth_state: Extension<Arc<AuthState>>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    let Some(uid) = file.strip_suffix(".svg").filter(|uid| !uid.is_empty()) else {
        return ApiError::NotFound("Not found".to_string()).into_response();
    };

    let document = match auth_state.users().get_user(uid).await {
        Ok(document) => document.unwrap_or_default(),
        Err(err) => {
            warn!(uid, "User document lookup failed for avatar: {err:#}");
            Default::default()
        }
    };

    let seed = document
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(uid);
    match fetch_abstract(&auth_state, seed).await {
        Ok(image) => image.into_response(),
        Err(err) => provider_failure(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/avatar/abstract/health",
    responses(
        (status = 200, description = "Provider reachable", body = AvatarHealth),
        (status = 500, description = "Provider key not configured", body = AvatarHealth),
        (status = 502, description = "Provider unreachable", body = AvatarHealth)
    ),
    tag = "dev"
)]
pub async fn abstract_health(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    match fetch_abstract(&auth_state, HEALTHCHECK_SEED).await {
        Ok(image) => (
            StatusCode::OK,
            Json(AvatarHealth {
                ok: true,
                provider_status: Some(StatusCode::OK.as_u16()),
                content_type: Some(image.content_type),
                error: None,
            }),
        ),
        Err(ProviderError::NotConfigured) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AvatarHealth {
                ok: false,
                provider_status: None,
                content_type: None,
                error: Some("Avatar provider key not configured".to_string()),
            }),
        ),
        Err(ProviderError::Upstream { status, source }) => {
            error!("Avatar provider health check failed: {source:#}");
            (
                StatusCode::BAD_GATEWAY,
                Json(AvatarHealth {
                    ok: false,
                    provider_status: status,
                    content_type: None,
                    error: Some("Failed to contact avatar provider".to_string()),
                }),
            )
        }
    }
}
