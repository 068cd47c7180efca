//! Worker processes as seen from the guardian.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::signal;
use crate::supervisor::{WorkerKey, WorkerProcess, WorkerSpawner};

/// Spawns workers by re-running an executable with the hidden `worker`
/// subcommand. Configuration travels through the environment.
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
            env: Vec::new(),
        }
    }

    /// Spawner for the currently running executable.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, key: WorkerKey) -> io::Result<Box<dyn WorkerProcess>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("RIP_WORKER_ID", key.0.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(ChildProcess { child }))
    }
}

/// An OS child process running a worker.
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<Option<i32>> {
        if let Some(pid) = self.child.id() {
            signal::send(pid, libc::SIGTERM)?;
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?.code()),
            Err(_) => {
                warn!(pid = ?self.child.id(), "worker ignored SIGTERM, killing");
                self.child.kill().await?;
                let status = self.child.wait().await?;
                debug!(?status, "worker killed");
                Ok(status.code())
            }
        }
    }
}
