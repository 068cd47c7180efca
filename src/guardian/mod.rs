//! The long-lived server process.
//!
//! The guardian takes the singleton lock, opens the control channel,
//! runs the [`Supervisor`] and (with hot reload on) a [`FileMonitor`].
//! It stops on SIGINT/SIGTERM/SIGQUIT or a `stop` command:
//!
//! 1. stop accepting control connections and file events
//! 2. stop the pool and wait for the workers to exit
//! 3. remove the control channel file
//! 4. release and remove the lock file

mod daemon;
mod lock;
mod paths;

pub use daemon::{deadline_after, expired, wait_ready, Daemon, DaemonStart};
pub use lock::{LockError, ServerLock};
pub use paths::RuntimePaths;

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::console::Console;
use crate::control::{Action, ChannelError, CommandHandler, ControlServer, Reply};
use crate::monitor::{self, FileMonitor, MonitorEvent};
use crate::signal::ShutdownSignals;
use crate::supervisor::{Supervisor, WorkerSpawner};
use crate::worker::create_reuse_port_listener;

/// Extra time allowed for the pool to wind down beyond the worker grace.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum GuardianError {
    /// The lock is held by another guardian.
    AlreadyRunning,
    Lock(LockError),
    Channel(ChannelError),
    /// The listen address is unusable.
    Bind { listen: String, error: io::Error },
    Io(io::Error),
}

impl fmt::Display for GuardianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardianError::AlreadyRunning => write!(f, "the server is already running"),
            GuardianError::Lock(e) => write!(f, "{}", e),
            GuardianError::Channel(e) => write!(f, "{}", e),
            GuardianError::Bind { listen, error } => {
                write!(f, "cannot listen on {}: {}", listen, error)
            }
            GuardianError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for GuardianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardianError::Lock(e) => Some(e),
            GuardianError::Channel(e) => Some(e),
            GuardianError::Bind { error, .. } => Some(error),
            GuardianError::Io(e) => Some(e),
            GuardianError::AlreadyRunning => None,
        }
    }
}

impl From<LockError> for GuardianError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyRunning => GuardianError::AlreadyRunning,
            other => GuardianError::Lock(other),
        }
    }
}

impl From<ChannelError> for GuardianError {
    fn from(e: ChannelError) -> Self {
        GuardianError::Channel(e)
    }
}

impl From<io::Error> for GuardianError {
    fn from(e: io::Error) -> Self {
        GuardianError::Io(e)
    }
}

/// Answers control commands against the running pool.
struct ControlHandler {
    supervisor: Supervisor,
    stop: mpsc::Sender<()>,
}

#[async_trait]
impl CommandHandler for ControlHandler {
    async fn handle(&self, action: Action) -> Reply {
        match action {
            Action::Start { .. } => Reply::error("the server is already running"),
            Action::Stop => {
                let _ = self.stop.try_send(());
                Reply::ok("The server is stopping")
            }
            Action::Reload => match self.supervisor.reload() {
                Ok(_) => Reply::ok("The server is reloading"),
                Err(e) => Reply::error(e.to_string()),
            },
            Action::Status => {
                Reply::ok("The server is running").with_status(self.supervisor.snapshot())
            }
        }
    }
}

/// Why the guardian began shutting down.
#[derive(Debug)]
enum StopCause {
    Signal(&'static str),
    Command,
    PoolEnded,
}

pub struct Guardian {
    config: Config,
    paths: RuntimePaths,
    spawner: Arc<dyn WorkerSpawner>,
}

impl Guardian {
    pub fn new(config: Config, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let paths = RuntimePaths::for_project(&config.server.project_path);
        Self {
            config,
            paths,
            spawner,
        }
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Serve until stopped. Prints the startup banner to `console`.
    pub async fn run<W: Write>(self, console: &mut Console<W>) -> Result<(), GuardianError> {
        self.paths.ensure_dirs()?;
        let lock = ServerLock::acquire(self.paths.lock_path())?;

        probe_listen(&self.config)?;
        let mut signals = ShutdownSignals::register()?;
        let control = ControlServer::bind(self.paths.pipe_path())?;

        self.banner(console)?;
        self.config.log_summary();

        let server = &self.config.server;
        let supervisor = Supervisor::new(
            Arc::clone(&self.spawner),
            server.workers,
            server.stop_timeout,
            server.status_logs,
        );
        let runner = supervisor.clone();
        let mut pool = tokio::spawn(async move { runner.run().await });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stop_tx, mut stop_rx) = mpsc::channel(1);

        let handler = Arc::new(ControlHandler {
            supervisor: supervisor.clone(),
            stop: stop_tx,
        });
        let control_task = tokio::spawn(control.serve(handler, shutdown_rx.clone()));

        let mut batches = if self.config.reload.enabled {
            let mut monitor = FileMonitor::new(self.config.reload.interval);
            for path in self.config.reload.resolve_paths(&server.project_path) {
                monitor.add(path);
            }
            let events = monitor.spawn(shutdown_rx.clone());
            Some(monitor::debounce(events, self.config.reload.debounce))
        } else {
            None
        };

        info!(pid = std::process::id(), "server started");

        let mut pool_done = false;
        let cause = loop {
            tokio::select! {
                name = signals.recv() => break StopCause::Signal(name),
                _ = stop_rx.recv() => break StopCause::Command,
                batch = next_batch(&mut batches) => match batch {
                    Some(batch) => on_file_batch(&supervisor, &batch),
                    None => batches = None,
                },
                result = &mut pool => {
                    pool_done = true;
                    if let Ok(Err(e)) = result {
                        error!(error = %e, "worker pool failed");
                    }
                    break StopCause::PoolEnded;
                }
            }
        };
        info!(cause = ?cause, "server stopping");

        let _ = shutdown_tx.send(true);
        supervisor.stop();
        if !pool_done {
            let wait = server.stop_timeout.saturating_add(SHUTDOWN_SLACK);
            if tokio::time::timeout(wait, &mut pool).await.is_err() {
                warn!(timeout_ms = wait.as_millis() as u64, "workers did not exit in time");
                pool.abort();
            }
        }
        let _ = control_task.await;

        match std::fs::remove_file(self.paths.pipe_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(error = %e, "failed to remove control channel");
            }
            _ => {}
        }
        drop(lock);

        info!("server stopped");
        Ok(())
    }

    fn banner<W: Write>(&self, console: &mut Console<W>) -> io::Result<()> {
        console.row("Worker", &format!("ripple {}", crate::VERSION))?;
        console.row("Conf", "")?;
        console.rows(self.config.rows())?;
        console.row("Logs", &self.paths.log_path().display().to_string())
    }
}

async fn next_batch(
    batches: &mut Option<mpsc::Receiver<Vec<MonitorEvent>>>,
) -> Option<Vec<MonitorEvent>> {
    match batches {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn on_file_batch(supervisor: &Supervisor, batch: &[MonitorEvent]) {
    for event in batch {
        info!("{}", event);
    }
    if let Err(e) = supervisor.reload() {
        warn!(error = %e, "file change reload skipped");
    }
}

/// Fail fast when the listen address cannot be bound at all. The probe
/// socket is closed again so the guardian never receives connections.
fn probe_listen(config: &Config) -> Result<SocketAddr, GuardianError> {
    let listen = config.server.listen.to_string();
    let bind_err = |error| GuardianError::Bind {
        listen: listen.clone(),
        error,
    };

    let addr = config.server.listen.resolve().map_err(bind_err)?;
    let probe = create_reuse_port_listener(addr).map_err(bind_err)?;
    drop(probe);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{PoolState, WorkerKey, WorkerProcess};
    use std::sync::Mutex;

    struct Idle;

    #[async_trait]
    impl WorkerProcess for Idle {
        fn pid(&self) -> Option<u32> {
            Some(1)
        }

        async fn wait(&mut self) -> io::Result<Option<i32>> {
            std::future::pending().await
        }

        async fn terminate(&mut self, _grace: Duration) -> io::Result<Option<i32>> {
            Ok(Some(0))
        }
    }

    struct IdleSpawner(Mutex<usize>);

    impl WorkerSpawner for IdleSpawner {
        fn spawn(&self, _key: WorkerKey) -> io::Result<Box<dyn WorkerProcess>> {
            *self.0.lock().unwrap() += 1;
            Ok(Box::new(Idle))
        }
    }

    fn handler() -> (ControlHandler, Supervisor, mpsc::Receiver<()>) {
        let supervisor = Supervisor::new(
            Arc::new(IdleSpawner(Mutex::new(0))),
            2,
            Duration::from_secs(1),
            1,
        );
        let (tx, rx) = mpsc::channel(1);
        (
            ControlHandler {
                supervisor: supervisor.clone(),
                stop: tx,
            },
            supervisor,
            rx,
        )
    }

    #[tokio::test]
    async fn test_status_and_reload_replies() {
        let (handler, supervisor, _stop) = handler();
        let runner = supervisor.clone();
        tokio::spawn(async move { runner.run().await });
        while supervisor.active() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let reply = handler.handle(Action::Status).await;
        assert!(reply.ok);
        let status = reply.status.unwrap();
        assert_eq!(status.state, PoolState::Running);
        assert_eq!(status.workers.len(), 2);

        let reply = handler.handle(Action::Reload).await;
        assert_eq!(reply, Reply::ok("The server is reloading"));
    }

    #[tokio::test]
    async fn test_stop_and_start_replies() {
        let (handler, _supervisor, mut stop) = handler();

        let reply = handler.handle(Action::Start { daemon: false }).await;
        assert!(!reply.ok);

        let reply = handler.handle(Action::Stop).await;
        assert!(reply.ok);
        assert!(stop.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_reload_before_start_is_an_error() {
        let (handler, _supervisor, _stop) = handler();
        let reply = handler.handle(Action::Reload).await;
        assert!(!reply.ok);
        assert_eq!(reply.message, "worker pool is idle");
    }
}
