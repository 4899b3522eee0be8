use axum::{response::IntoResponse, Json};

use super::auth::types::OkResponse;

#[utoipa::path(
    get,
    path = "/api",
    responses(
        (status = 200, description = "API is reachable", body = OkResponse)
    ),
    tag = "health"
)]
pub async fn root() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}
