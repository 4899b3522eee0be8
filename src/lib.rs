//! # Helpdesk (auth and session bridge)
//!
//! `helpdesk` is the backend of the college helpdesk. Students sign in through an
//! external identity provider, and this service bridges that identity into its own
//! short-lived access tokens and long-lived refresh sessions.
//!
//! ## Credentials
//!
//! - **Access token:** HS256 JWT carrying the full profile snapshot, valid for 15 minutes.
//!   Sent as `Authorization: Bearer <token>`.
//! - **Refresh token:** 64 random bytes (hex) in an `HttpOnly` cookie. Only its SHA-256 hash
//!   is persisted, inside a session record that also holds the profile snapshot.
//!
//! ## Storage
//!
//! Sessions go to Postgres first and fall back to a local JSON file when the database is
//! unreachable. Fallback records are migrated into Postgres on the next successful start.
//!
//! ## Profile reconciliation
//!
//! Every login path (password, identity token, OAuth, dev impersonation) produces an
//! identity claim and runs the same pipeline: claim, then latest session meta, then the
//! user document, then the avatar proxy URL. The user document wins because it is the
//! only source written by OTP verification and profile edits.

pub mod api;
pub mod cli;
pub mod error;
pub mod identity;
pub mod mail;
pub mod otp;
pub mod profile;
pub mod session;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
