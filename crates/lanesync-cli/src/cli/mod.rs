//! CLI entry and dispatch.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lanesync_core::actions::DEFAULT_TRAIN_ITERS;
use lanesync_core::config::{self, BASE_URL_ENV, PollInterval};
use lanesync_core::logging;
use lanesync_core::snapshot::Lane;

mod commands;

/// Returned when the user interrupts a long-running command (Ctrl+C).
#[derive(Debug)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted")
    }
}

impl std::error::Error for Interrupted {}

#[derive(Parser)]
#[command(name = "lanesync")]
#[command(version)]
#[command(about = "Live view and control of a four-lane traffic signal controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (overrides config)
    #[arg(long, global = true, env = BASE_URL_ENV, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Poll the controller and print each status update
    Watch {
        /// Poll interval: 0.5s, 1s, 2s, or milliseconds
        #[arg(short, long, value_parser = parse_interval)]
        interval: Option<Duration>,

        /// Print one JSON object per update
        #[arg(long)]
        json: bool,
    },

    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "LANESYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create a user account
    Signup {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "LANESYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Remove the stored session token
    Logout,

    /// Toggle emergency preemption
    Emergency {
        #[command(subcommand)]
        command: EmergencyCommands,
    },

    /// Switch the detection source
    Mode {
        #[arg(value_enum)]
        source: ModeSource,
    },

    /// Request a pedestrian crossing
    Pedestrian {
        /// Lane number (1-4)
        #[arg(short, long, value_parser = parse_lane)]
        lane: Lane,
    },

    /// Hold a lane green for a fixed time (officials only)
    Takeover {
        /// Lane number (1-4)
        #[arg(short, long, value_parser = parse_lane)]
        lane: Lane,
        /// Seconds to hold the lane
        #[arg(short, long)]
        duration: u32,
    },

    /// Return the signal to automatic control (officials only)
    Release,

    /// Train the learning agent from its replay buffer (officials only)
    Train {
        #[arg(long, default_value_t = DEFAULT_TRAIN_ITERS)]
        iters: u32,
    },

    /// Show learning agent statistics (officials only)
    Stats,

    /// List or acknowledge prolonged max-green alerts (officials only)
    Alerts {
        #[command(subcommand)]
        command: Option<AlertCommands>,
    },

    /// Show the manual override log (officials only)
    Logs,

    /// Predict a lane's vehicle count from recorded history (officials only)
    Predict {
        /// Lane number (1-4)
        #[arg(short, long, value_parser = parse_lane)]
        lane: Lane,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum EmergencyCommands {
    /// Switch emergency preemption on
    On {
        /// Lane number (1-4) to give priority
        #[arg(short, long, value_parser = parse_lane)]
        lane: Option<Lane>,
    },
    /// Switch emergency preemption off
    Off,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeSource {
    /// Synthetic counts
    Mock,
    /// Camera detection
    Camera,
}

#[derive(clap::Subcommand)]
enum AlertCommands {
    /// List all alerts (default)
    List,
    /// Acknowledge the alerts for one lane
    Ack {
        /// Lane number (1-4)
        #[arg(short, long, value_parser = parse_lane)]
        lane: Lane,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

/// Accepts a named cadence or any positive number of milliseconds.
fn parse_interval(value: &str) -> Result<Duration, String> {
    if let Ok(interval) = value.parse::<PollInterval>() {
        return Ok(interval.as_duration());
    }
    match value.trim().parse::<u64>() {
        Ok(0) => Err("interval must be positive".to_string()),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(_) => Err(format!("invalid interval '{value}' (use 0.5s, 1s, 2s or milliseconds)")),
    }
}

/// Lanes are numbered 1-4 on the command line.
fn parse_lane(value: &str) -> Result<Lane, String> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(Lane::new)
        .ok_or_else(|| format!("invalid lane '{value}' (expected 1-4)"))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;
    let log_dir = config.log_to_file.then(config::paths::logs_dir);
    logging::init_tracing(log_dir.as_deref());

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli, config).await })
}

async fn dispatch(cli: Cli, config: config::Config) -> Result<()> {
    let Cli { command, base_url } = cli;

    let base_url = || -> Result<String> {
        match base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Ok(url.to_string()),
            None => config.resolved_base_url(),
        }
    };

    match command {
        Commands::Watch { interval, json } => {
            commands::watch::run(commands::watch::WatchOptions {
                base_url: &base_url()?,
                config: &config,
                interval,
                json,
            })
            .await
        }

        Commands::Login { username, password } => {
            commands::auth::login(&base_url()?, &config, &username, &password).await
        }
        Commands::Signup { username, password } => {
            commands::auth::signup(&base_url()?, &config, &username, &password).await
        }
        Commands::Logout => commands::auth::logout(),

        Commands::Emergency { command } => {
            let client = commands::control::client(&base_url()?, &config)?;
            match command {
                EmergencyCommands::On { lane } => commands::control::emergency(&client, true, lane).await,
                EmergencyCommands::Off => commands::control::emergency(&client, false, None).await,
            }
        }
        Commands::Mode { source } => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::set_mode(&client, matches!(source, ModeSource::Mock)).await
        }
        Commands::Pedestrian { lane } => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::pedestrian(&client, lane).await
        }
        Commands::Takeover { lane, duration } => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::takeover(&client, lane, duration).await
        }
        Commands::Release => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::release(&client).await
        }
        Commands::Train { iters } => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::train(&client, iters).await
        }
        Commands::Stats => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::stats(&client).await
        }
        Commands::Alerts { command } => {
            let client = commands::control::client(&base_url()?, &config)?;
            match command.unwrap_or(AlertCommands::List) {
                AlertCommands::List => commands::control::alerts(&client).await,
                AlertCommands::Ack { lane } => commands::control::ack_alert(&client, lane).await,
            }
        }
        Commands::Logs => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::override_log(&client).await
        }
        Commands::Predict { lane } => {
            let client = commands::control::client(&base_url()?, &config)?;
            commands::control::predict(&client, lane).await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_accepts_named_and_millis() {
        assert_eq!(parse_interval("0.5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("slow").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_interval("750").unwrap(), Duration::from_millis(750));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_parse_lane_is_one_based() {
        assert_eq!(parse_lane("1").unwrap(), Lane::new(0).unwrap());
        assert_eq!(parse_lane("4").unwrap(), Lane::new(3).unwrap());
        assert!(parse_lane("0").is_err());
        assert!(parse_lane("5").is_err());
        assert!(parse_lane("x").is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
