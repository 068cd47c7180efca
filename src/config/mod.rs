//! Configuration module for ripple_drive.
//!
//! This module provides centralized configuration loading from environment variables.
//! The guardian forwards the same variables to every worker process it spawns.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_drive::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen);
//! println!("Workers: {}", config.server.workers);
//! ```

mod error;
mod logging;
mod parse;
mod reload;
mod server;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use parse::{bool_label, parse_duration, value_to_bool};
pub use reload::{ControlConfig, ReloadConfig, DEFAULT_WATCH_PATHS};
pub use server::{resolve_workers, ListenAddr, ServerConfig, DEFAULT_LISTEN, DEFAULT_WORKERS};

use std::path::PathBuf;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Hot reload configuration.
    pub reload: ReloadConfig,
    /// Control channel configuration.
    pub control: ControlConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            reload: ReloadConfig::from_env()?,
            control: ControlConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Override the project root.
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.server.project_path = path.into();
        self
    }

    /// Override the listen address.
    pub fn with_listen(mut self, listen: ListenAddr) -> Self {
        self.server.listen = listen;
        self
    }

    /// Override the worker count (0 = one per CPU).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.server.workers = resolve_workers(workers);
        self
    }

    /// Override hot reload.
    pub fn with_reload(mut self, enabled: bool) -> Self {
        self.reload.enabled = enabled;
        self
    }

    /// Environment handed to worker and daemon processes so they see the
    /// same settings, command-line overrides included.
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RIP_PROJECT_PATH", self.server.project_path.display().to_string()),
            ("RIP_HTTP_LISTEN", self.server.listen.to_string()),
            ("RIP_HTTP_WORKERS", self.server.workers.to_string()),
            ("RIP_HTTP_RELOAD", bool_label(self.reload.enabled).to_string()),
            ("RIP_STOP_TIMEOUT", format!("{}ms", self.server.stop_timeout.as_millis())),
            ("LOG_FORMAT", match self.logging.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Text => "text".to_string(),
            }),
            ("SERVICE_NAME", self.logging.service_name.clone()),
        ]
    }

    /// Banner rows printed by the guardian at startup.
    pub fn rows(&self) -> Vec<(String, String)> {
        vec![
            ("- Listen".to_string(), self.server.listen.to_string()),
            ("- Workers".to_string(), self.server.workers.to_string()),
            ("- Reload".to_string(), bool_label(self.reload.enabled).to_string()),
        ]
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Project: {}", self.server.project_path.display());
        info!("  Listen: {}", self.server.listen);
        info!("  Workers: {}", self.server.workers);
        info!("  Stop timeout: {}ms", self.server.stop_timeout.as_millis());
        info!("  Command timeout: {}ms", self.control.command_timeout.as_millis());

        if self.reload.enabled {
            info!(
                "  Reload: on (interval {}ms, debounce {}ms)",
                self.reload.interval.as_millis(),
                self.reload.debounce.as_millis()
            );
        } else {
            info!("  Reload: off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_defaults() {
        // Clear all env vars that might affect the test
        for key in [
            "RIP_PROJECT_PATH",
            "RIP_HTTP_LISTEN",
            "RIP_HTTP_WORKERS",
            "RIP_HTTP_RELOAD",
            "RIP_WATCH_PATHS",
            "RIP_WATCH_INTERVAL",
            "RIP_RELOAD_DEBOUNCE",
            "RIP_COMMAND_TIMEOUT",
            "RIP_STOP_TIMEOUT",
            "RIP_STATUS_LOGS",
            "LOG_FORMAT",
        ] {
            std::env::remove_var(key);
        }

        let config = Config::from_env().expect("Should load config");

        assert_eq!(config.server.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.server.workers, DEFAULT_WORKERS);
        assert_eq!(config.server.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.server.status_logs, 1);
        assert!(!config.reload.enabled);
        assert_eq!(config.reload.watch_paths.len(), DEFAULT_WATCH_PATHS.len());
        assert_eq!(config.reload.debounce, Duration::from_secs(1));
        assert_eq!(config.control.command_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_overrides_and_rows() {
        let config = Config::from_env()
            .expect("Should load config")
            .with_project_path("/srv/app")
            .with_listen("http://0.0.0.0:9000".parse().unwrap())
            .with_workers(2)
            .with_reload(true);

        assert_eq!(
            config.rows(),
            vec![
                ("- Listen".to_string(), "http://0.0.0.0:9000".to_string()),
                ("- Workers".to_string(), "2".to_string()),
                ("- Reload".to_string(), "on".to_string()),
            ]
        );

        let env = config.worker_env();
        assert!(env.contains(&("RIP_PROJECT_PATH", "/srv/app".to_string())));
        assert!(env.contains(&("RIP_HTTP_WORKERS", "2".to_string())));
        assert!(env.contains(&("RIP_HTTP_RELOAD", "on".to_string())));
    }
}
