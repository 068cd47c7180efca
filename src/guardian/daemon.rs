//! Background start: relaunch the guardian detached from the terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

/// Outcome of waiting for a daemonized guardian.
#[derive(Debug, PartialEq, Eq)]
pub enum DaemonStart {
    /// The control channel appeared.
    Ready { pid: u32 },
    /// The process exited before opening its channel.
    Exited { code: Option<i32> },
    /// Still starting when the wait ran out.
    Pending { pid: u32 },
}

/// Launches `program args...` in its own process group with output
/// appended to a log file.
pub struct Daemon {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Daemon {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["server".into(), "start".into()],
            env: Vec::new(),
        }
    }

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

    /// Spawn detached; stdout and stderr go to `log`.
    pub fn spawn(&self, log: &Path) -> io::Result<Child> {
        let out = OpenOptions::new().create(true).append(true).open(log)?;
        let err = out.try_clone()?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .process_group(0)
            .spawn()?;

        debug!(pid = child.id(), log = %log.display(), "daemon spawned");
        Ok(child)
    }
}

/// `now + after`, or `None` when that instant is not representable.
pub fn deadline_after(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// Whether `deadline` has passed; a missing deadline never does.
pub fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Poll until `ready` (the control channel path) exists, the child exits,
/// or `timeout` passes.
pub async fn wait_ready(child: &mut Child, ready: &Path, timeout: Duration) -> io::Result<DaemonStart> {
    let deadline = deadline_after(timeout);
    loop {
        if ready.exists() {
            return Ok(DaemonStart::Ready { pid: child.id() });
        }
        if let Some(status) = child.try_wait()? {
            return Ok(DaemonStart::Exited {
                code: status.code(),
            });
        }
        if expired(deadline) {
            return Ok(DaemonStart::Pending { pid: child.id() });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_when_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("ripple.log");
        let ready = dir.path().join("ripple.pipe");

        let script = format!("echo booting; touch {}; sleep 5", ready.display());
        let mut child = Daemon::new("/bin/sh")
            .args(["-c", script.as_str()])
            .spawn(&log)
            .unwrap();

        let outcome = wait_ready(&mut child, &ready, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, DaemonStart::Ready { pid: child.id() });
        let _ = child.kill();
        let _ = child.wait();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("booting"));
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("ripple.log");

        let mut child = Daemon::new("/bin/sh")
            .args(["-c", "exit 2"])
            .spawn(&log)
            .unwrap();

        let outcome = wait_ready(&mut child, &dir.path().join("never"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, DaemonStart::Exited { code: Some(2) });
    }

    #[test]
    fn test_deadline_saturates() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(!expired(deadline_after(Duration::MAX)));

        assert!(expired(deadline_after(Duration::ZERO)));
        assert!(!expired(deadline_after(Duration::from_secs(60))));
    }
}
