//! ripple_drive - supervise a pool of HTTP worker processes.
//!
//! A long-lived guardian process owns a singleton lock and a UNIX-socket
//! control channel, keeps the configured number of worker processes alive
//! and replaces them on crash, reload command or (optionally) file change.
//! Every worker binds the same address with SO_REUSEPORT so the kernel
//! spreads connections across them.
//!
//! # Layout
//!
//! - [`frame`] - byte framing used on the control channel
//! - [`control`] - command envelopes, client and server
//! - [`monitor`] - polling file monitor with debounced batches
//! - [`supervisor`] - worker pool lifecycle
//! - [`worker`] - the HTTP worker process
//! - [`guardian`] - lock, runtime paths, daemon start and the server loop
//! - [`cli`] - `ripple server start|stop|reload|status`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ripple_drive::{Config, console::Console, guardian::Guardian, worker::ProcessSpawner};
//!
//! let config = Config::from_env()?;
//! let spawner = ProcessSpawner::current_exe()?.envs(config.worker_env());
//! Guardian::new(config, Arc::new(spawner))
//!     .run(&mut Console::new(std::io::stdout()))
//!     .await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod cli;
pub mod config;
pub mod console;
pub mod control;
pub mod frame;
pub mod guardian;
pub mod logging;
pub mod monitor;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use config::Config;
