//! API handlers for the helpdesk service.
//!
//! `auth` owns sessions and identity; the rest are thin proxies and document endpoints
//! that reuse its shared state and bearer checks.

pub mod auth;
pub mod avatar;
pub mod chat;
pub mod config;
pub mod health;
pub mod root;
