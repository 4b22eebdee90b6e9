//! Configuration management for lanesync.
//!
//! Loads configuration from ${LANESYNC_HOME}/config.toml with sensible defaults.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the configured base URL.
pub const BASE_URL_ENV: &str = "LANESYNC_BASE_URL";

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for lanesync configuration and data directories.
    //!
    //! LANESYNC_HOME resolution order:
    //! 1. LANESYNC_HOME environment variable (if set)
    //! 2. ~/.config/lanesync (default)
    //! 3. ./.lanesync when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the lanesync home directory.
    pub fn lanesync_home() -> PathBuf {
        if let Ok(home) = std::env::var("LANESYNC_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".lanesync"),
            |h| h.join(".config").join("lanesync"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        lanesync_home().join("config.toml")
    }

    /// Returns the directory for rolling log files.
    pub fn logs_dir() -> PathBuf {
        lanesync_home().join("logs")
    }
}

/// Poll cadences offered to users.
///
/// The engine accepts any positive interval; these are the values the
/// dashboard exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    /// 0.5s
    Fast,
    /// 1s
    Normal,
    /// 2s
    Slow,
}

impl PollInterval {
    pub fn as_millis(self) -> u64 {
        match self {
            PollInterval::Fast => 500,
            PollInterval::Normal => 1000,
            PollInterval::Slow => 2000,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.as_millis())
    }

    pub fn label(self) -> &'static str {
        match self {
            PollInterval::Fast => "0.5s",
            PollInterval::Normal => "1s",
            PollInterval::Slow => "2s",
        }
    }

    pub fn all() -> &'static [PollInterval] {
        &[PollInterval::Fast, PollInterval::Normal, PollInterval::Slow]
    }

    /// Returns the recognized cadence for a millisecond value, if any.
    pub fn from_millis(ms: u64) -> Option<Self> {
        Self::all().iter().copied().find(|i| i.as_millis() == ms)
    }
}

impl FromStr for PollInterval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "500" | "0.5s" | "fast" => Ok(Self::Fast),
            "1000" | "1s" | "normal" => Ok(Self::Normal),
            "2000" | "2s" | "slow" => Ok(Self::Slow),
            other => Err(format!("Unknown poll interval: {other}")),
        }
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL
    pub base_url: String,
    /// Wait between polls in milliseconds (must be positive)
    pub interval_ms: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Log to a rolling file under $LANESYNC_HOME/logs
    pub log_to_file: bool,
}

impl Config {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:5000";
    pub const DEFAULT_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

    /// Loads configuration from the default path.
    ///
    /// # Errors
    /// Returns an error if the file exists but is unreadable or invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but is unreadable or invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a commented config file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            bail!("interval_ms must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolves the base URL with precedence: env > config > default.
    ///
    /// # Errors
    /// Returns an error if the winning value is not a valid URL.
    pub fn resolved_base_url(&self) -> Result<String> {
        let env_url = std::env::var(BASE_URL_ENV).ok();
        resolve_base_url(env_url.as_deref(), Some(&self.base_url))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            interval_ms: Self::DEFAULT_INTERVAL_MS,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            log_to_file: false,
        }
    }
}

/// Picks the first non-blank candidate (env, then config), else the default.
fn resolve_base_url(env_url: Option<&str>, config_url: Option<&str>) -> Result<String> {
    let chosen = [env_url, config_url]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|u| !u.is_empty())
        .unwrap_or(Config::DEFAULT_BASE_URL);
    url::Url::parse(chosen).with_context(|| format!("Invalid backend base URL: {chosen}"))?;
    Ok(chosen.to_string())
}
