//! Command-line surface: `ripple server start|stop|reload|status`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{value_to_bool, Config, ListenAddr};
use crate::console::Console;
use crate::control::{Action, ChannelError, ControlClient, Reply};
use crate::guardian::{
    deadline_after, expired, wait_ready, Daemon, DaemonStart, Guardian, GuardianError, RuntimePaths,
    ServerLock,
};
use crate::supervisor::PoolSnapshot;
use crate::worker::{self, ProcessSpawner, StubHandler};

pub type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const NOT_RUNNING: &str = "The server is not running";
const ALREADY_RUNNING: &str = "the server is already running";

/// Multi-worker HTTP server supervisor.
#[derive(Parser, Debug)]
#[command(name = "ripple", version = crate::VERSION, disable_help_subcommand = true)]
pub struct Cli {
    /// Project root (defaults to RIP_PROJECT_PATH, then the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Server lifecycle commands.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Runs one worker process (spawned by the server).
    #[command(hide = true)]
    Worker,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ServerAction {
    /// Starts the server in the foreground, or in the background with --daemon.
    Start {
        /// Detach and log to runtime/logs/ripple.log.
        #[arg(short, long)]
        daemon: bool,
        #[command(flatten)]
        overrides: StartOverrides,
    },
    /// Stops a running server.
    Stop,
    /// Replaces every worker with a fresh process.
    Reload,
    /// Prints pool state of a running server.
    Status,
}

/// Flags overriding the environment for `start`.
#[derive(Args, Debug, Clone, Default)]
pub struct StartOverrides {
    /// Listen address, `http://host:port`.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<ListenAddr>,
    /// Worker count (0 = one per CPU).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
    /// Hot reload on file changes (on/off).
    #[arg(long, value_name = "on|off", value_parser = parse_switch)]
    pub reload: Option<bool>,
}

fn parse_switch(value: &str) -> Result<bool, String> {
    Ok(value_to_bool(value))
}

impl StartOverrides {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(listen) = &self.listen {
            config = config.with_listen(listen.clone());
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(reload) = self.reload {
            config = config.with_reload(reload);
        }
        config
    }
}

/// Execute a parsed command line, writing operator output to `out`.
pub async fn run<W: Write>(cli: Cli, out: W) -> CliResult {
    let mut config = Config::from_env()?;
    if let Some(project) = &cli.project {
        config = config.with_project_path(project);
    }
    crate::logging::init(&config.logging);

    let mut console = Console::new(out);

    match cli.command {
        CliCommand::Worker => run_worker(&config).await,
        CliCommand::Server { action } => match action {
            ServerAction::Start { daemon, overrides } => {
                let config = overrides.apply(config);
                if daemon {
                    start_daemon(&config, &mut console).await
                } else {
                    start_foreground(config, &mut console).await
                }
            }
            ServerAction::Stop => stop(&config, &mut console).await,
            ServerAction::Reload => reload(&config, &mut console).await,
            ServerAction::Status => status(&config, &mut console).await,
        },
    }
}

async fn run_worker(config: &Config) -> CliResult {
    let worker_id = std::env::var("RIP_WORKER_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    worker::run(config, worker_id, Arc::new(StubHandler)).await?;
    Ok(())
}

async fn start_foreground<W: Write>(config: Config, console: &mut Console<W>) -> CliResult {
    let spawner = ProcessSpawner::current_exe()?.envs(config.worker_env());
    let guardian = Guardian::new(config, Arc::new(spawner));

    match guardian.run(console).await {
        Ok(()) => Ok(()),
        Err(GuardianError::AlreadyRunning) => {
            console.warn(ALREADY_RUNNING)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn start_daemon<W: Write>(config: &Config, console: &mut Console<W>) -> CliResult {
    let paths = RuntimePaths::for_project(&config.server.project_path);
    if ServerLock::is_held(paths.lock_path())? {
        console.warn(ALREADY_RUNNING)?;
        return Ok(());
    }

    // No live server holds the lock, so any channel file is stale.
    match std::fs::remove_file(paths.pipe_path()) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    paths.ensure_dirs()?;

    let mut child = Daemon::current_exe()?
        .envs(config.worker_env())
        .spawn(paths.log_path())?;

    let log = paths.log_path().display().to_string();
    match wait_ready(&mut child, paths.pipe_path(), config.control.command_timeout).await? {
        DaemonStart::Ready { .. } => console.info("server started")?,
        DaemonStart::Pending { .. } => console.info(&format!("server starting, see {}", log))?,
        DaemonStart::Exited { .. } => {
            console.warn(&format!("the server failed to start, see {}", log))?
        }
    }
    Ok(())
}

/// Send one action; `None` means no server is running.
async fn request(config: &Config, action: Action) -> Result<Option<Reply>, ChannelError> {
    let paths = RuntimePaths::for_project(&config.server.project_path);
    let client = match ControlClient::connect(paths.pipe_path(), config.control.command_timeout).await {
        Ok(client) => client,
        Err(e) if e.is_unavailable() => return Ok(None),
        Err(e) => return Err(e),
    };

    let reply = client.request(action).await?;
    let _ = client.close().await;
    Ok(Some(reply))
}

async fn stop<W: Write>(config: &Config, console: &mut Console<W>) -> CliResult {
    let reply = match request(config, Action::Stop).await {
        Ok(Some(reply)) => reply,
        Ok(None) => {
            console.warn(NOT_RUNNING)?;
            return Ok(());
        }
        // The server may close the channel before the reply is written.
        Err(ChannelError::Closed) => Reply::ok("stopping"),
        Err(e) => return Err(e.into()),
    };
    if !reply.ok {
        console.warn(&reply.message)?;
        return Ok(());
    }

    let pipe = RuntimePaths::for_project(&config.server.project_path)
        .pipe_path()
        .to_path_buf();
    let deadline = deadline_after(
        config
            .control
            .command_timeout
            .saturating_add(config.server.stop_timeout),
    );
    while pipe.exists() && !expired(deadline) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if pipe.exists() {
        console.warn("The server is still stopping")?;
    } else {
        console.info("server stopped")?;
    }
    Ok(())
}

async fn reload<W: Write>(config: &Config, console: &mut Console<W>) -> CliResult {
    match request(config, Action::Reload).await? {
        None => console.warn(NOT_RUNNING)?,
        Some(reply) if reply.ok => console.info(&reply.message)?,
        Some(reply) => console.warn(&reply.message)?,
    }
    Ok(())
}

async fn status<W: Write>(config: &Config, console: &mut Console<W>) -> CliResult {
    match request(config, Action::Status).await? {
        None => console.warn(NOT_RUNNING)?,
        Some(reply) => {
            console.info(&reply.message)?;
            if let Some(snapshot) = &reply.status {
                console.rows(status_rows(snapshot))?;
            }
        }
    }
    Ok(())
}

/// Rows printed by `status`.
pub fn status_rows(snapshot: &PoolSnapshot) -> Vec<(String, String)> {
    let mut rows = vec![
        ("- State".to_string(), snapshot.state.to_string()),
        (
            "- Workers".to_string(),
            format!("{}/{}", snapshot.workers.len(), snapshot.desired),
        ),
    ];

    for worker in &snapshot.workers {
        let pid = worker
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        let mut value = format!("pid {}, up {}s", pid, worker.uptime_secs);
        if worker.retiring {
            value.push_str(", stopping");
        }
        rows.push((format!("- Worker {}", worker.key), value));
    }

    for line in &snapshot.logs {
        rows.push(("- Log".to_string(), line.clone()));
    }
    rows
}
