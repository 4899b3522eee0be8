//! Auth handlers and supporting modules.
//!
//! Every login entry point (password, identity token, Google OAuth, dev impersonation)
//! resolves to an identity claim and hands it to [`issue::establish_session`], which runs
//! profile reconciliation, signs the access token and persists the refresh session.
//!
//! ## Refresh cookie
//!
//! `refreshToken` is `HttpOnly`, `SameSite=Lax`, `Path=/` and lives 30 days. It is only
//! marked `Secure` when the public URL is HTTPS. Rotation on refresh is opt-in.
//!
//! ## Admin
//!
//! Config writes require a bearer token whose uid or email is on the `admins` allow-list
//! document. Raw identity-provider tokens are accepted as a fallback unless disabled.

pub(crate) mod admin;
mod cookies;
pub(crate) mod dev;
mod issue;
pub(crate) mod login;
pub(crate) mod oauth;
pub(crate) mod otp;
pub(crate) mod profile;
pub(crate) mod session;
mod state;
pub(crate) mod types;

pub use state::{AuthConfig, AuthState};
