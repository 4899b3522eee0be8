//! Session, token and origin settings.

use anyhow::{Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, Command};
use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_PRODUCTION: &str = "production";
pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_ALLOWED_ORIGINS: &str = "allowed-origins";
pub const ARG_SESSIONS_FILE: &str = "sessions-file";
pub const ARG_ROTATE_REFRESH_TOKENS: &str = "rotate-refresh-tokens";
pub const ARG_ADMIN_PROVIDER_TOKENS: &str = "admin-provider-tokens";

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub production: bool,
    pub public_url: Url,
    pub allowed_origins: Vec<String>,
    pub sessions_file: Option<PathBuf>,
    pub rotate_refresh_tokens: bool,
    pub admin_provider_tokens: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the JWT secret is missing or the public URL is invalid.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|secret| !secret.is_empty())
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --jwt-secret")?;

        let public_url = matches
            .get_one::<String>(ARG_PUBLIC_URL)
            .context("missing required argument: --public-url")?;
        let public_url = Url::parse(public_url)
            .with_context(|| format!("invalid --public-url: {public_url}"))?;

        Ok(Self {
            jwt_secret,
            production: matches.get_flag(ARG_PRODUCTION),
            public_url,
            allowed_origins: matches
                .get_many::<String>(ARG_ALLOWED_ORIGINS)
                .map(|origins| origins.cloned().collect())
                .unwrap_or_default(),
            sessions_file: matches
                .get_one::<String>(ARG_SESSIONS_FILE)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            rotate_refresh_tokens: matches.get_flag(ARG_ROTATE_REFRESH_TOKENS),
            admin_provider_tokens: matches
                .get_one::<bool>(ARG_ADMIN_PROVIDER_TOKENS)
                .copied()
                .unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Access-token signing secret")
                .env("HELPDESK_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PRODUCTION)
                .long(ARG_PRODUCTION)
                .help("Production mode: no dev login or impersonation, database required")
                .env("HELPDESK_PRODUCTION")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Public base URL of this service, used for avatar proxy links")
                .env("HELPDESK_PUBLIC_URL")
                .default_value("http://localhost:4000"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGINS)
                .long(ARG_ALLOWED_ORIGINS)
                .help("Extra CORS and OAuth redirect origins, comma separated")
                .env("HELPDESK_ALLOWED_ORIGINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_SESSIONS_FILE)
                .long(ARG_SESSIONS_FILE)
                .help("Fallback session file used when the database is unavailable")
                .env("HELPDESK_SESSIONS_FILE")
                .default_value("sessions.json"),
        )
        .arg(
            Arg::new(ARG_ROTATE_REFRESH_TOKENS)
                .long(ARG_ROTATE_REFRESH_TOKENS)
                .help("Issue a new refresh token on every refresh")
                .env("HELPDESK_ROTATE_REFRESH_TOKENS")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_ADMIN_PROVIDER_TOKENS)
                .long(ARG_ADMIN_PROVIDER_TOKENS)
                .help("Accept raw identity-provider tokens for admin checks")
                .env("HELPDESK_ADMIN_PROVIDER_TOKENS")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
}
