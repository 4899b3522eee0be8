//! Log verbosity: repeated `-v` flags or `HELPDESK_LOG_LEVEL`.
//!
//! Both resolve to a count. Zero keeps the subscriber at errors only, each step adds one
//! level up to trace. The env var takes either a level name or the count itself.

use clap::{builder::ValueParser, Arg, ArgAction, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names in verbosity order.
const LEVELS: [(&str, Level); 5] = [
    ("error", Level::ERROR),
    ("warn", Level::WARN),
    ("info", Level::INFO),
    ("debug", Level::DEBUG),
    ("trace", Level::TRACE),
];

/// Parse `HELPDESK_LOG_LEVEL`.
///
/// # Errors
/// Returns a message listing the accepted names when `raw` is neither a name nor a count.
pub fn parse_verbosity(raw: &str) -> Result<u8, String> {
    let raw = raw.trim();
    if let Ok(count) = raw.parse::<u8>() {
        return Ok(count);
    }
    LEVELS
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case(raw))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            let names: Vec<&str> = LEVELS.iter().map(|(name, _)| *name).collect();
            format!("unknown log level `{raw}`, expected {} or 0-4", names.join("|"))
        })
}

/// Tracing level for a verbosity count, `None` at zero. Counts past trace saturate.
#[must_use]
pub fn level(verbosity: u8) -> Option<Level> {
    if verbosity == 0 {
        return None;
    }
    let index = usize::from(verbosity).min(LEVELS.len() - 1);
    LEVELS.get(index).map(|(_, level)| *level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace)")
            .env("HELPDESK_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::new(parse_verbosity)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_counts_are_accepted() {
        assert_eq!(parse_verbosity("error"), Ok(0));
        assert_eq!(parse_verbosity(" INFO "), Ok(2));
        assert_eq!(parse_verbosity("Trace"), Ok(4));
        assert_eq!(parse_verbosity("3"), Ok(3));
        assert!(parse_verbosity("loud").is_err_and(|err| err.contains("error|warn|info")));
    }

    #[test]
    fn counts_map_to_levels() {
        assert_eq!(level(0), None);
        assert_eq!(level(1), Some(Level::WARN));
        assert_eq!(level(2), Some(Level::INFO));
        assert_eq!(level(3), Some(Level::DEBUG));
        assert_eq!(level(4), Some(Level::TRACE));
        assert_eq!(level(9), Some(Level::TRACE));
    }
}
