//! Core lanesync library (snapshot model, fetcher, history, poll engine, config).

pub mod actions;
pub mod config;
pub mod credential;
pub mod fetcher;
pub mod history;
pub mod logging;
pub mod publisher;
pub mod scheduler;
pub mod snapshot;

/// Number of approaches managed by the controller.
pub const LANE_COUNT: usize = 4;

/// Standard User-Agent header for lanesync requests.
pub const USER_AGENT: &str = concat!("lanesync/", env!("CARGO_PKG_VERSION"));
