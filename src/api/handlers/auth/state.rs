//! Auth configuration and the shared state injected into every handler.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use secrecy::SecretString;
use sqlx::PgPool;
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};
use url::Url;

use crate::{
    identity::{GoogleOAuth, IdentityProvider},
    mail::MailSender,
    otp::OtpVerifier,
    profile::ProfileReconciler,
    session::SessionStore,
    store::{ConfigStore, DocumentStore, UserDirectory},
    token::TokenIssuer,
};

const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];
const DEFAULT_AVATAR_ENDPOINT: &str = "https://avatars.abstractapi.com/v1/";
const DEFAULT_CHAT_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
const LOCAL_ORIGIN_PATTERN: &str = r"^https?://(localhost|127\.0\.0\.1)(:\d+)?$";
const LOCAL_REDIRECT_PATTERN: &str = r"^https?://(localhost|127\.0\.0\.1)(:\d+)?(/|$)";

static LOCAL_ORIGIN: OnceLock<Option<Regex>> = OnceLock::new();
static LOCAL_REDIRECT: OnceLock<Option<Regex>> = OnceLock::new();

fn local_origin() -> Option<&'static Regex> {
    LOCAL_ORIGIN
        .get_or_init(|| Regex::new(LOCAL_ORIGIN_PATTERN).ok())
        .as_ref()
}

fn local_redirect() -> Option<&'static Regex> {
    LOCAL_REDIRECT
        .get_or_init(|| Regex::new(LOCAL_REDIRECT_PATTERN).ok())
        .as_ref()
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    public_url: Url,
    production: bool,
    allowed_origins: Vec<String>,
    sessions_file: Option<PathBuf>,
    rotate_refresh_tokens: bool,
    admin_provider_tokens: bool,
    abstract_api_key: Option<SecretString>,
    huggingface_api_key: Option<SecretString>,
    avatar_endpoint: String,
    chat_endpoint: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString, public_url: Url) -> Self {
        Self {
            jwt_secret,
            public_url,
            production: false,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
            sessions_file: None,
            rotate_refresh_tokens: false,
            admin_provider_tokens: true,
            abstract_api_key: None,
            huggingface_api_key: None,
            avatar_endpoint: DEFAULT_AVATAR_ENDPOINT.to_string(),
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
        }
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Extra origins are appended to the defaults, skipping blanks and duplicates.
    #[must_use]
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for origin in origins {
            let origin = origin.as_ref().trim().trim_end_matches('/');
            if !origin.is_empty() && !self.allowed_origins.iter().any(|o| o == origin) {
                self.allowed_origins.push(origin.to_string());
            }
        }
        self
    }

    #[must_use]
    pub fn with_sessions_file(mut self, path: Option<PathBuf>) -> Self {
        self.sessions_file = path;
        self
    }

    #[must_use]
    pub fn with_rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    #[must_use]
    pub fn with_admin_provider_tokens(mut self, accept: bool) -> Self {
        self.admin_provider_tokens = accept;
        self
    }

    #[must_use]
    pub fn with_abstract_api_key(mut self, key: Option<SecretString>) -> Self {
        self.abstract_api_key = key;
        self
    }

    #[must_use]
    pub fn with_huggingface_api_key(mut self, key: Option<SecretString>) -> Self {
        self.huggingface_api_key = key;
        self
    }

    #[must_use]
    pub fn with_avatar_endpoint(mut self, endpoint: String) -> Self {
        self.avatar_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn with_chat_endpoint(mut self, endpoint: String) -> Self {
        self.chat_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn sessions_file(&self) -> Option<&PathBuf> {
        self.sessions_file.as_ref()
    }

    pub(crate) fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    pub(crate) fn rotate_refresh_tokens(&self) -> bool {
        self.rotate_refresh_tokens
    }

    pub(crate) fn admin_provider_tokens(&self) -> bool {
        self.admin_provider_tokens
    }

    pub(crate) fn abstract_api_key(&self) -> Option<&SecretString> {
        self.abstract_api_key.as_ref()
    }

    pub(crate) fn huggingface_api_key(&self) -> Option<&SecretString> {
        self.huggingface_api_key.as_ref()
    }

    pub(crate) fn avatar_endpoint(&self) -> &str {
        &self.avatar_endpoint
    }

    pub(crate) fn chat_endpoint(&self) -> &str {
        &self.chat_endpoint
    }

    /// Cookies are only marked `Secure` when the service is reached over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.public_url.scheme() == "https"
    }

    /// CORS check: configured origins, plus any localhost origin outside production.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.iter().any(|allowed| allowed == origin) {
            return true;
        }
        !self.production && local_origin().is_some_and(|regex| regex.is_match(origin))
    }

    /// OAuth post-login redirect check. A path is accepted when it resolves to this
    /// service's own origin; absolute URLs must belong to an allowed origin. Backslashes
    /// and control characters are refused outright since browsers fold them into `//host`.
    #[must_use]
    pub fn redirect_allowed(&self, redirect: &str) -> bool {
        if redirect.contains('\\') || redirect.chars().any(char::is_control) {
            return false;
        }
        if redirect.starts_with('/') {
            return self
                .public_url
                .join(redirect)
                .is_ok_and(|resolved| resolved.origin() == self.public_url.origin());
        }
        if self.allowed_origins.iter().any(|origin| {
            redirect == origin
                || redirect
                    .strip_prefix(origin.as_str())
                    .is_some_and(|rest| rest.starts_with(&['/', '?', '#'][..]))
        }) {
            return true;
        }
        !self.production && local_redirect().is_some_and(|regex| regex.is_match(redirect))
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: TokenIssuer,
    sessions: Arc<SessionStore>,
    reconciler: ProfileReconciler,
    otp: OtpVerifier,
    users: Arc<dyn UserDirectory>,
    documents: Arc<dyn ConfigStore>,
    identity: Arc<dyn IdentityProvider>,
    google: Option<GoogleOAuth>,
    http: Client,
    knowledge_base: Option<String>,
    pool: Option<PgPool>,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the signing secret is empty or the HTTP client cannot be built.
    pub fn new<D>(
        config: AuthConfig,
        sessions: Arc<SessionStore>,
        store: Arc<D>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Option<Arc<dyn MailSender>>,
    ) -> Result<Self>
    where
        D: DocumentStore + 'static,
    {
        let tokens = TokenIssuer::new(config.jwt_secret()).context("invalid JWT secret")?;
        let reconciler =
            ProfileReconciler::new(config.public_url().clone(), sessions.clone(), store.clone());
        let otp = OtpVerifier::new(store.clone(), store.clone(), sessions.clone(), mailer);
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            tokens,
            sessions,
            reconciler,
            otp,
            users: store.clone(),
            documents: store,
            identity,
            google: None,
            http,
            knowledge_base: None,
            pool: None,
        })
    }

    #[must_use]
    pub fn with_google(mut self, google: Option<GoogleOAuth>) -> Self {
        self.google = google;
        self
    }

    #[must_use]
    pub fn with_knowledge_base(mut self, knowledge_base: Option<String>) -> Self {
        self.knowledge_base = knowledge_base;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Option<PgPool>) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub(crate) fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub(crate) fn reconciler(&self) -> &ProfileReconciler {
        &self.reconciler
    }

    pub(crate) fn otp(&self) -> &OtpVerifier {
        &self.otp
    }

    pub(crate) fn users(&self) -> &dyn UserDirectory {
        self.users.as_ref()
    }

    pub(crate) fn documents(&self) -> &dyn ConfigStore {
        self.documents.as_ref()
    }

    pub(crate) fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    pub(crate) fn google(&self) -> Option<&GoogleOAuth> {
        self.google.as_ref()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn knowledge_base(&self) -> Option<&str> {
        self.knowledge_base.as_deref()
    }

    pub(crate) fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }
}
