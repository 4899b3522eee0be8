//! Third-party integrations. Every one of them is optional; missing keys disable the
//! feature that needs them.

use clap::{Arg, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_FIREBASE_API_KEY: &str = "firebase-api-key";
pub const ARG_SERVICE_ACCOUNT: &str = "service-account";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_GOOGLE_REDIRECT_URI: &str = "google-redirect-uri";
pub const ARG_ABSTRACT_API_KEY: &str = "abstract-api-key";
pub const ARG_BREVO_API_KEY: &str = "brevo-api-key";
pub const ARG_MAIL_FROM: &str = "mail-from";
pub const ARG_MAIL_FROM_NAME: &str = "mail-from-name";
pub const ARG_HUGGINGFACE_API_KEY: &str = "huggingface-api-key";
pub const ARG_KNOWLEDGE_BASE: &str = "knowledge-base";

#[derive(Debug, Default)]
pub struct Options {
    pub firebase_api_key: Option<SecretString>,
    pub service_account: Option<PathBuf>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub google_redirect_uri: Option<String>,
    pub abstract_api_key: Option<SecretString>,
    pub brevo_api_key: Option<SecretString>,
    pub mail_from: String,
    pub mail_from_name: String,
    pub huggingface_api_key: Option<SecretString>,
    pub knowledge_base: Option<PathBuf>,
}

fn non_empty(matches: &clap::ArgMatches, id: &str) -> Option<String> {
    matches
        .get_one::<String>(id)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn secret(matches: &clap::ArgMatches, id: &str) -> Option<SecretString> {
    non_empty(matches, id).map(SecretString::from)
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            firebase_api_key: secret(matches, ARG_FIREBASE_API_KEY),
            service_account: non_empty(matches, ARG_SERVICE_ACCOUNT).map(PathBuf::from),
            google_client_id: non_empty(matches, ARG_GOOGLE_CLIENT_ID),
            google_client_secret: secret(matches, ARG_GOOGLE_CLIENT_SECRET),
            google_redirect_uri: non_empty(matches, ARG_GOOGLE_REDIRECT_URI),
            abstract_api_key: secret(matches, ARG_ABSTRACT_API_KEY),
            brevo_api_key: secret(matches, ARG_BREVO_API_KEY),
            mail_from: non_empty(matches, ARG_MAIL_FROM)
                .unwrap_or_else(|| "no-reply@helpdesk.local".to_string()),
            mail_from_name: non_empty(matches, ARG_MAIL_FROM_NAME)
                .unwrap_or_else(|| "Helpdesk".to_string()),
            huggingface_api_key: secret(matches, ARG_HUGGINGFACE_API_KEY),
            knowledge_base: non_empty(matches, ARG_KNOWLEDGE_BASE).map(PathBuf::from),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_identity_args(command);
    let command = with_mail_args(command);
    with_content_args(command)
}

fn with_identity_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FIREBASE_API_KEY)
                .long(ARG_FIREBASE_API_KEY)
                .help("Identity provider REST key, enables email/password login")
                .env("HELPDESK_FIREBASE_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SERVICE_ACCOUNT)
                .long(ARG_SERVICE_ACCOUNT)
                .help("Identity provider service-account JSON file (project id and signing key)")
                .env("HELPDESK_SERVICE_ACCOUNT_PATH"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("HELPDESK_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("HELPDESK_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_REDIRECT_URI)
                .long(ARG_GOOGLE_REDIRECT_URI)
                .help("Google OAuth redirect URI, must point at /api/oauth/google/callback")
                .env("HELPDESK_GOOGLE_REDIRECT_URI"),
        )
}

fn with_mail_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BREVO_API_KEY)
                .long(ARG_BREVO_API_KEY)
                .help("Brevo API key for transactional mail")
                .env("HELPDESK_BREVO_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address for outgoing mail")
                .env("HELPDESK_MAIL_FROM")
                .default_value("no-reply@helpdesk.local"),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM_NAME)
                .long(ARG_MAIL_FROM_NAME)
                .help("Sender display name for outgoing mail")
                .env("HELPDESK_MAIL_FROM_NAME")
                .default_value("Helpdesk"),
        )
}

fn with_content_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ABSTRACT_API_KEY)
                .long(ARG_ABSTRACT_API_KEY)
                .help("Avatar provider API key")
                .env("HELPDESK_ABSTRACT_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_HUGGINGFACE_API_KEY)
                .long(ARG_HUGGINGFACE_API_KEY)
                .help("Chat completion API key")
                .env("HELPDESK_HUGGINGFACE_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_KNOWLEDGE_BASE)
                .long(ARG_KNOWLEDGE_BASE)
                .help("Knowledge base file embedded in the chat assistant prompt")
                .env("HELPDESK_KNOWLEDGE_BASE"),
        )
}
