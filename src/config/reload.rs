//! Hot reload and control channel configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::parse::{env_bool, env_duration, env_or};
use super::ConfigError;

/// Project-relative paths watched when hot reload is on.
pub const DEFAULT_WATCH_PATHS: &[&str] = &[
    "app",
    "bootstrap",
    "config",
    "database",
    "routes",
    "resources",
    ".env",
];

/// Hot reload configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ReloadConfig {
    /// Watch sources and reload the pool on change.
    pub enabled: bool,
    /// Watched paths, relative to the project root unless absolute.
    pub watch_paths: Vec<PathBuf>,
    /// Poll interval of the file monitor.
    pub interval: Duration,
    /// Window over which file events collapse into one reload.
    pub debounce: Duration,
}

impl ReloadConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let watch_paths = parse_watch_list(&env_or("RIP_WATCH_PATHS", &DEFAULT_WATCH_PATHS.join(",")));

        let interval = env_duration("RIP_WATCH_INTERVAL", "1s")?;
        if interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RIP_WATCH_INTERVAL".into(),
                message: "poll interval cannot be zero".into(),
            });
        }

        Ok(Self {
            enabled: env_bool("RIP_HTTP_RELOAD", false),
            watch_paths,
            interval,
            debounce: env_duration("RIP_RELOAD_DEBOUNCE", "1s")?,
        })
    }

    /// Watched paths joined onto `project`.
    pub fn resolve_paths(&self, project: &Path) -> Vec<PathBuf> {
        self.watch_paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { project.join(p) })
            .collect()
    }
}

fn parse_watch_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Control channel configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ControlConfig {
    /// How long the CLI waits for a reply before dropping the request.
    pub command_timeout: Duration,
}

impl ControlConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let command_timeout = env_duration("RIP_COMMAND_TIMEOUT", "5s")?;
        if command_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RIP_COMMAND_TIMEOUT".into(),
                message: "timeout cannot be disabled".into(),
            });
        }
        Ok(Self { command_timeout })
    }
}
