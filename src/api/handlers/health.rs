use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// `ok`, `error`, or `disabled` when sessions only live in the fallback store.
    database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatabaseStatus {
    Ok,
    Error,
    Disabled,
}

impl DatabaseStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

async fn database_status(pool: Option<&PgPool>) -> DatabaseStatus {
    let Some(pool) = pool else {
        return DatabaseStatus::Disabled;
    };

    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => DatabaseStatus::Ok,
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    DatabaseStatus::Error
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            DatabaseStatus::Error
        }
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up; database reachable or not configured", body = Health),
        (status = 503, description = "Database configured but unreachable", body = Health)
    ),
    tag= "health"
)]
pub async fn health(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let status = database_status(auth_state.pool()).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status.as_str().to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    debug!(
        database = status.as_str(),
        durable_sessions = auth_state.sessions().has_primary(),
        "Health check"
    );

    if status == DatabaseStatus::Error {
        (StatusCode::SERVICE_UNAVAILABLE, headers, Json(health))
    } else {
        (StatusCode::OK, headers, Json(health))
    }
}
