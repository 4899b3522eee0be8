use crate::{
    api::handlers::{auth, avatar, chat, config, health, root},
    identity::{GoogleOAuth, IdentityProvider},
    mail::MailSender,
    session::{FileSessionBackend, PgSessionBackend, SessionBackend, SessionStore},
    store::{DocumentStore, MemoryStore, PgStore},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Instrument, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use handlers::auth::{AuthConfig, AuthState};
pub use openapi::openapi;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Optional collaborators wired in by the CLI.
pub struct Integrations {
    pub identity: Arc<dyn IdentityProvider>,
    pub google: Option<GoogleOAuth>,
    pub mailer: Option<Arc<dyn MailSender>>,
    pub knowledge_base: Option<String>,
}

/// Build the router. Development helpers are only mounted outside production.
#[must_use]
pub fn app(auth_state: Arc<AuthState>) -> Router {
    let origin_config = auth_state.config().clone();
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| origin_config.origin_allowed(origin))
            },
        ))
        .allow_credentials(true);

    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/api", get(root::root))
        .route("/api/login", post(auth::login::login))
        .route("/api/login-token", post(auth::login::login_token))
        .route("/api/oauth/google/start", get(auth::oauth::oauth_start))
        .route("/api/oauth/google/callback", get(auth::oauth::oauth_callback))
        .route(
            "/api/profile",
            get(auth::profile::get_profile).post(auth::profile::update_profile),
        )
        .route("/api/refresh", post(auth::session::refresh))
        .route("/api/logout", post(auth::session::logout))
        .route("/api/otp/send", post(auth::otp::send_otp))
        .route("/api/otp/verify", post(auth::otp::verify_otp))
        .route(
            "/api/config/:doc",
            get(config::get_config).put(config::put_config),
        )
        .route("/api/avatar/:file", get(avatar::avatar_file))
        .route("/api/avatar/abstract/:seed", get(avatar::abstract_avatar))
        .route("/api/chat", post(chat::chat));

    if !auth_state.config().production() {
        router = router
            .route("/api/__dev/impersonate", post(auth::dev::impersonate))
            .route("/api/avatar/abstract/health", get(avatar::abstract_health));
    }

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        )
}

/// Start the server
/// # Errors
/// Return error if the durable store is required but unreachable, or the listener fails
pub async fn new(
    port: u16,
    dsn: Option<String>,
    auth_config: AuthConfig,
    integrations: Integrations,
) -> Result<()> {
    let production = auth_config.production();
    let pool = match dsn.as_deref().filter(|dsn| !dsn.is_empty()) {
        Some(dsn) => match connect(dsn).await {
            Ok(pool) => Some(pool),
            Err(err) if !production => {
                warn!("Database unavailable, using in-memory documents and fallback sessions: {err:#}");
                None
            }
            Err(err) => return Err(err),
        },
        None if production => return Err(anyhow!("A database DSN is required in production")),
        None => {
            warn!("No database DSN configured, using in-memory documents and fallback sessions");
            None
        }
    };

    let fallback: Arc<dyn SessionBackend> = match auth_config.sessions_file() {
        Some(path) => Arc::new(
            FileSessionBackend::open(path.clone())
                .await
                .context("Failed to open fallback sessions file")?,
        ),
        None => Arc::new(FileSessionBackend::in_memory()),
    };

    let auth_state = match &pool {
        Some(pool) => {
            let sessions = Arc::new(SessionStore::new(
                Arc::new(PgSessionBackend::new(pool.clone())),
                fallback,
            ));
            match sessions.migrate_from_fallback().await {
                Ok(report) if report.migrated > 0 => {
                    info!(migrated = report.migrated, "Fallback sessions migrated");
                }
                Ok(_) => {}
                Err(err) => warn!("Fallback session migration failed, will retry on next start: {err:#}"),
            }
            build_state(
                auth_config,
                sessions,
                Arc::new(PgStore::new(pool.clone())),
                integrations,
            )?
        }
        None => build_state(
            auth_config,
            Arc::new(SessionStore::fallback_only(fallback)),
            Arc::new(MemoryStore::new()),
            integrations,
        )?,
    };
    let auth_state = Arc::new(auth_state.with_pool(pool));

    let app = app(auth_state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn build_state<D>(
    auth_config: AuthConfig,
    sessions: Arc<SessionStore>,
    store: Arc<D>,
    integrations: Integrations,
) -> Result<AuthState>
where
    D: DocumentStore + 'static,
{
    Ok(AuthState::new(
        auth_config,
        sessions,
        store,
        integrations.identity,
        integrations.mailer,
    )?
    .with_google(integrations.google)
    .with_knowledge_base(integrations.knowledge_base))
}

async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(Duration::from_secs(5))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    for statement in schema_statements(SCHEMA) {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = %statement
        );
        sqlx::query(&statement)
            .execute(&pool)
            .instrument(span)
            .await
            .context("Failed to apply database schema")?;
    }

    Ok(pool)
}

/// Split a schema file into statements, dropping `--` comment lines.
fn schema_statements(sql: &str) -> Vec<String> {
    let without_comments = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    without_comments
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_create_statements() {
        let statements = schema_statements(SCHEMA);
        assert!(!statements.is_empty());
        assert!(statements
            .iter()
            .all(|statement| statement.starts_with("CREATE ")));
        assert!(statements
            .iter()
            .any(|statement| statement.contains("CREATE TABLE IF NOT EXISTS sessions")));
    }
}
