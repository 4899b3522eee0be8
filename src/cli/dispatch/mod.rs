use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, providers, ARG_DSN, ARG_PORT},
};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4000);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .map(|dsn| dsn.trim().to_string())
        .filter(|dsn| !dsn.is_empty());

    let auth = auth::Options::parse(matches)?;
    let providers = providers::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        auth,
        providers,
    }))
}
