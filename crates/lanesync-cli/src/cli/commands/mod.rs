//! CLI command handlers.

pub mod auth;
pub mod config;
pub mod control;
pub mod watch;
