//! Process-wide tracing setup.
//!
//! Filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. Output
//! goes to stderr so stdout stays free for command output, or to a daily
//! rolling file when a log directory is given.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn,lanesync=info,lanesync_core=info";

const LOG_FILE_PREFIX: &str = "lanesync.log";

/// Keeps the non-blocking writer alive for the life of the process.
static GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// When `log_dir` cannot be created, logging falls back to stderr.
pub fn init_tracing(log_dir: Option<&Path>) {
    GUARD.get_or_init(|| {
        if let Some(dir) = log_dir {
            match std::fs::create_dir_all(dir) {
                Ok(()) => {
                    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    tracing_subscriber::fmt()
                        .with_env_filter(env_filter())
                        .with_ansi(false)
                        .with_target(true)
                        .with_writer(writer)
                        .try_init()
                        .ok();
                    return Some(guard);
                }
                Err(err) => {
                    eprintln!(
                        "Warning: cannot create log directory {}: {err}",
                        dir.display()
                    );
                }
            }
        }

        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .ok();
        None
    });
}
