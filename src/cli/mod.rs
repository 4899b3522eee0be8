//! Command line: arguments, dispatch into an [`actions::Action`], and telemetry setup.

pub mod actions;
pub mod commands;
pub mod dispatch;
mod start;
pub mod telemetry;

pub use self::start::start;
