//! Shared configuration documents: public reads, admin-only merge writes.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::auth::{admin::require_admin, types::OkResponse, AuthState};
use crate::error::{ApiError, ErrorBody};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ConfigResponse {
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
}

#[utoipa::path(
    get,
    path = "/api/config/{doc}",
    params(
        ("doc" = String, Path, description = "Config document name")
    ),
    responses(
        (status = 200, description = "Document contents", body = ConfigResponse),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 500, description = "Failed to read config", body = ErrorBody)
    ),
    tag = "config"
)]
pub async fn get_config(
    auth_state: Extension<Arc<AuthState>>,
    Path(doc): Path<String>,
) -> impl IntoResponse {
    match auth_state.documents().get_config(&doc).await {
        Ok(Some(data)) => (StatusCode::OK, Json(ConfigResponse { data })).into_response(),
        Ok(None) => ApiError::NotFound("Not found".to_string()).into_response(),
        Err(err) => {
            error!(doc = %doc, "Failed to read config: {err:#}");
            ApiError::Internal("Failed to read config".to_string()).into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/config/{doc}",
    params(
        ("doc" = String, Path, description = "Config document name"),
        ("Authorization" = String, Header, description = "Bearer access token or identity-provider token")
    ),
    request_body(content = Object, description = "Top-level keys to merge"),
    responses(
        (status = 200, description = "Merged", body = OkResponse),
        (status = 400, description = "Body is not a JSON object", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 403, description = "Admin required", body = ErrorBody),
        (status = 500, description = "Failed to write config", body = ErrorBody)
    ),
    tag = "config"
)]
pub async fn put_config(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(doc): Path<String>,
    payload: Option<Json<Value>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &auth_state).await {
        Ok(admin) => admin,
        Err(err) => return err.into_response(),
    };

    let Some(Json(Value::Object(data))) = payload else {
        return ApiError::BadRequest("Body must be a JSON object".to_string()).into_response();
    };

    match auth_state.documents().merge_config(&doc, &data).await {
        Ok(()) => {
            info!(
                doc = %doc,
                admin_uid = %admin.uid,
                admin_email = %admin.email,
                keys = data.len(),
                "Config updated"
            );
            (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
        }
        Err(err) => {
            error!(doc = %doc, "Failed to write config: {err:#}");
            ApiError::Internal("Failed to write config".to_string()).into_response()
        }
    }
}
