//! Worker pool supervision.
//!
//! The [`Supervisor`] keeps `desired` worker processes alive. Each worker
//! is owned by a watcher task that waits for the process to exit (or for
//! a stop signal, in which case it terminates the process) and then
//! reports back to the supervisor loop. The loop removes the handle and,
//! unless the pool is stopped, spawns a replacement.
//!
//! ```text
//! Idle ──run()──▶ Running ──reload()──▶ Reloading ──(old workers gone)──▶ Running
//!                    │                      │
//!                    └──────stop()──────────┴──────▶ Stopped
//! ```
//!
//! Reload never restarts a process in place: every live worker is told to
//! stop and each exit is answered with a fresh process.

mod error;
mod ring;

pub use error::SupervisorError;
pub use ring::LogRing;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Delay before retrying after a failed spawn.
pub const SPAWN_BACKOFF: Duration = Duration::from_secs(1);

/// Identity of one worker handle. Never reused within a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerKey(pub u64);

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A running worker process as seen by its watcher task.
#[async_trait]
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit; returns the exit code if it had one.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the process to stop, escalating once `grace` runs out.
    async fn terminate(&mut self, grace: Duration) -> io::Result<Option<i32>>;
}

/// Creates worker processes.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, key: WorkerKey) -> io::Result<Box<dyn WorkerProcess>>;
}

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Idle,
    Running,
    Reloading,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Idle => "idle",
            PoolState::Running => "running",
            PoolState::Reloading => "reloading",
            PoolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One worker in a [`PoolSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub key: WorkerKey,
    pub pid: Option<u32>,
    pub uptime_secs: u64,
    pub retiring: bool,
}

/// Point-in-time view of the pool, shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub state: PoolState,
    pub desired: usize,
    pub workers: Vec<WorkerSnapshot>,
    pub logs: Vec<String>,
}

/// Supervisor-side handle to one worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    key: WorkerKey,
    pid: Option<u32>,
    started: Instant,
    stop: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub fn key(&self) -> WorkerKey {
        self.key
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the worker has been told to stop.
    pub fn is_retiring(&self) -> bool {
        self.stop.is_none()
    }

    /// Signal the watcher to terminate the process. Returns false if
    /// already signalled.
    fn retire(&mut self) -> bool {
        match self.stop.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

enum Event {
    Exited { key: WorkerKey, code: Option<i32> },
    Retry,
    Wake,
}

struct Pool {
    state: PoolState,
    desired: usize,
    workers: BTreeMap<WorkerKey, WorkerHandle>,
    next_key: u64,
    retry_pending: bool,
    backoff: Duration,
    logs: LogRing,
}

struct Shared {
    pool: Mutex<Pool>,
    spawner: Arc<dyn WorkerSpawner>,
    grace: Duration,
    events: mpsc::UnboundedSender<Event>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

/// Owner of the worker pool. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Build an idle supervisor for `desired` workers (at least one).
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        desired: usize,
        grace: Duration,
        log_capacity: usize,
    ) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                pool: Mutex::new(Pool {
                    state: PoolState::Idle,
                    desired: desired.max(1),
                    workers: BTreeMap::new(),
                    next_key: 1,
                    retry_pending: false,
                    backoff: SPAWN_BACKOFF,
                    logs: LogRing::new(log_capacity),
                }),
                spawner,
                grace,
                events,
                receiver: Mutex::new(Some(receiver)),
            }),
        }
    }

    /// Override the spawn retry delay.
    pub fn with_backoff(self, backoff: Duration) -> Self {
        self.shared.lock().backoff = backoff;
        self
    }

    /// Spawn the pool and supervise it until it is stopped and empty.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        let mut events = self
            .shared
            .receiver
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(SupervisorError::AlreadyStarted)?;

        {
            let mut pool = self.shared.lock();
            if pool.state != PoolState::Idle {
                return Err(SupervisorError::AlreadyStarted);
            }
            pool.state = PoolState::Running;
            info!(workers = pool.desired, "starting worker pool");
            self.shared.top_up(&mut pool);
        }

        while let Some(event) = events.recv().await {
            let mut pool = self.shared.lock();
            match event {
                Event::Exited { key, code } => self.shared.on_exit(&mut pool, key, code),
                Event::Retry => pool.retry_pending = false,
                Event::Wake => {}
            }

            if pool.state == PoolState::Stopped {
                if pool.workers.is_empty() {
                    info!("worker pool stopped");
                    break;
                }
            } else {
                self.shared.top_up(&mut pool);
            }
        }

        Ok(())
    }

    /// Replace every live worker with a fresh process.
    ///
    /// Returns the number of workers told to stop. A reload requested while
    /// one is in progress does nothing.
    pub fn reload(&self) -> Result<usize, SupervisorError> {
        let mut pool = self.shared.lock();
        match pool.state {
            PoolState::Running => {}
            PoolState::Reloading => {
                debug!("reload already in progress");
                return Ok(0);
            }
            state => return Err(SupervisorError::NotRunning(state)),
        }

        let retired = pool
            .workers
            .values_mut()
            .map(WorkerHandle::retire)
            .filter(|r| *r)
            .count();
        if retired > 0 {
            pool.state = PoolState::Reloading;
        }
        pool.logs.push(format!("reloading {} workers", retired));
        info!(workers = retired, "reloading worker pool");
        Ok(retired)
    }

    /// Stop every worker and suppress respawns. Idempotent.
    pub fn stop(&self) -> usize {
        let mut pool = self.shared.lock();
        if pool.state != PoolState::Stopped {
            info!("stopping worker pool");
            pool.logs.push("stopping");
        }
        pool.state = PoolState::Stopped;

        let stopped = pool
            .workers
            .values_mut()
            .map(WorkerHandle::retire)
            .filter(|r| *r)
            .count();
        let _ = self.shared.events.send(Event::Wake);
        stopped
    }

    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    /// Number of worker processes currently alive, retiring ones included.
    pub fn active(&self) -> usize {
        self.shared.lock().workers.len()
    }

    pub fn keys(&self) -> Vec<WorkerKey> {
        self.shared.lock().workers.keys().copied().collect()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let pool = self.shared.lock();
        PoolSnapshot {
            state: pool.state,
            desired: pool.desired,
            workers: pool
                .workers
                .values()
                .map(|h| WorkerSnapshot {
                    key: h.key,
                    pid: h.pid,
                    uptime_secs: h.started.elapsed().as_secs(),
                    retiring: h.is_retiring(),
                })
                .collect(),
            logs: pool.logs.entries(),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_exit(&self, pool: &mut Pool, key: WorkerKey, code: Option<i32>) {
        let Some(handle) = pool.workers.remove(&key) else {
            return;
        };

        let pid = handle.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
        let message = match code {
            Some(code) => format!("worker {} (pid {}) exited with code {}", key, pid, code),
            None => format!("worker {} (pid {}) exited by signal", key, pid),
        };
        if handle.is_retiring() {
            debug!("{}", message);
        } else {
            warn!("{}", message);
        }
        pool.logs.push(message);

        if pool.state == PoolState::Reloading && !pool.workers.values().any(WorkerHandle::is_retiring)
        {
            pool.state = PoolState::Running;
            pool.logs.push("reload complete");
            info!("reload complete");
        }
    }

    /// Spawn until the pool holds `desired` processes. One process is
    /// spawned per slot, so a single exit yields a single replacement.
    fn top_up(&self, pool: &mut Pool) {
        while pool.workers.len() < pool.desired {
            if pool.retry_pending {
                return;
            }

            let key = WorkerKey(pool.next_key);
            pool.next_key += 1;

            match self.spawner.spawn(key) {
                Ok(process) => {
                    let pid = process.pid();
                    let (stop_tx, stop_rx) = oneshot::channel();
                    tokio::spawn(watch_worker(
                        key,
                        process,
                        stop_rx,
                        self.grace,
                        self.events.clone(),
                    ));
                    debug!(worker = key.0, pid = ?pid, "worker spawned");
                    pool.workers.insert(
                        key,
                        WorkerHandle {
                            key,
                            pid,
                            started: Instant::now(),
                            stop: Some(stop_tx),
                        },
                    );
                }
                Err(e) => {
                    let message = format!("failed to spawn worker {}: {}", key, e);
                    warn!("{}", message);
                    pool.logs.push(message);
                    pool.retry_pending = true;

                    let events = self.events.clone();
                    let backoff = pool.backoff;
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        let _ = events.send(Event::Retry);
                    });
                    return;
                }
            }
        }
    }
}

async fn watch_worker(
    key: WorkerKey,
    mut process: Box<dyn WorkerProcess>,
    stop: oneshot::Receiver<()>,
    grace: Duration,
    events: mpsc::UnboundedSender<Event>,
) {
    let code = tokio::select! {
        status = process.wait() => match status {
            Ok(code) => code,
            Err(e) => {
                warn!(worker = key.0, error = %e, "waiting on worker failed");
                None
            }
        },
        _ = stop => match process.terminate(grace).await {
            Ok(code) => code,
            Err(e) => {
                warn!(worker = key.0, error = %e, "terminating worker failed");
                None
            }
        },
    };

    let _ = events.send(Event::Exited { key, code });
}
