//! A single worker process.
//!
//! Each worker binds the shared listen address with SO_REUSEPORT, serves
//! HTTP through a [`RequestHandler`], and on SIGINT/SIGTERM/SIGQUIT stops
//! accepting, drains open connections and exits 0. The worker never
//! restarts itself; the supervisor replaces it.

mod handler;
mod listener;
mod process;
mod server;

pub use handler::{HandlerError, RequestHandler, StubHandler, WorkerContext};
pub use listener::create_reuse_port_listener;
pub use process::{ChildProcess, ProcessSpawner};
pub use server::{WorkerServer, MAX_BODY_BYTES};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::signal::ShutdownSignals;

/// Errors that end a worker process.
#[derive(Debug)]
pub enum WorkerError {
    /// The listen address did not resolve.
    Resolve { listen: String, error: io::Error },
    /// Binding the shared address failed.
    Bind { addr: SocketAddr, error: io::Error },
    /// Signal registration or another runtime I/O failure.
    Io(io::Error),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Resolve { listen, error } => {
                write!(f, "cannot resolve {}: {}", listen, error)
            }
            WorkerError::Bind { addr, error } => write!(f, "cannot bind {}: {}", addr, error),
            WorkerError::Io(e) => write!(f, "worker I/O error: {}", e),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Resolve { error, .. } => Some(error),
            WorkerError::Bind { error, .. } => Some(error),
            WorkerError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for WorkerError {
    fn from(e: io::Error) -> Self {
        WorkerError::Io(e)
    }
}

/// Run one worker until a termination signal arrives.
pub async fn run(
    config: &Config,
    worker_id: u64,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), WorkerError> {
    let mut signals = ShutdownSignals::register()?;

    let addr = config
        .server
        .listen
        .resolve()
        .map_err(|error| WorkerError::Resolve {
            listen: config.server.listen.to_string(),
            error,
        })?;
    let std_listener =
        create_reuse_port_listener(addr).map_err(|error| WorkerError::Bind { addr, error })?;
    let listener =
        TcpListener::from_std(std_listener).map_err(|error| WorkerError::Bind { addr, error })?;

    let server = WorkerServer::new(listener, handler, worker_id, &config.server.project_path);
    server::log_listening(worker_id, addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let name = signals.recv().await;
        info!(worker = worker_id, signal = name, "worker stopping");
        let _ = shutdown_tx.send(true);
    });

    server.serve(shutdown_rx, config.server.stop_timeout).await;
    info!(worker = worker_id, "worker exited");
    Ok(())
}
