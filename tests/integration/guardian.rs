//! A guardian supervising `/bin/sh` workers, driven through the CLI.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ripple_drive::cli::{self, Cli};
use ripple_drive::console::Console;
use ripple_drive::control::{Action, ControlClient};
use ripple_drive::guardian::{Guardian, GuardianError};
use ripple_drive::supervisor::PoolState;
use ripple_drive::worker::ProcessSpawner;

use crate::helpers::{plain, test_config, wait_until};

fn sleeping_workers() -> Arc<ProcessSpawner> {
    Arc::new(ProcessSpawner::new("/bin/sh").args(["-c", "sleep 30"]))
}

async fn cli_output(project: &str, action: &str) -> String {
    let cli = Cli::try_parse_from(["ripple", "--project", project, "server", action]).unwrap();
    let mut out = Vec::new();
    cli::run(cli, &mut out).await.unwrap();
    plain(&out)
}

#[tokio::test]
async fn test_start_status_reload_stop() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().to_str().unwrap().to_string();
    let guardian = Guardian::new(test_config(dir.path(), 2), sleeping_workers());
    let paths = guardian.paths().clone();

    let mut banner = Vec::new();
    let server = async {
        let mut console = Console::plain(&mut banner);
        guardian.run(&mut console).await
    };

    let operator = async {
        assert!(wait_until(Duration::from_secs(5), || paths.pipe_path().exists()).await);
        assert!(paths.lock_path().exists());

        let client = ControlClient::connect(paths.pipe_path(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut live = 0;
        for _ in 0..100 {
            let status = client.request(Action::Status).await.unwrap().status.unwrap();
            live = status.workers.iter().filter(|w| w.pid.is_some()).count();
            if status.state == PoolState::Running && live == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(live, 2);
        client.close().await.unwrap();

        let status = cli_output(&project, "status").await;
        assert!(status.contains("The server is running"), "{:?}", status);
        assert!(status.contains("2/2"));

        let reload = cli_output(&project, "reload").await;
        assert!(reload.contains("The server is reloading"), "{:?}", reload);

        let stop = cli_output(&project, "stop").await;
        assert!(stop.contains("server stopped"), "{:?}", stop);
    };

    let (result, ()) = tokio::join!(server, operator);
    result.unwrap();

    assert!(!paths.pipe_path().exists());
    assert!(!paths.lock_path().exists());
    let banner = String::from_utf8(banner).unwrap();
    assert!(banner.contains("Workers"));
    assert!(banner.contains("ripple.log"));
}

#[tokio::test]
async fn test_second_guardian_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let first = Guardian::new(test_config(dir.path(), 1), sleeping_workers());
    let paths = first.paths().clone();

    let server = async {
        let mut console = Console::plain(std::io::sink());
        first.run(&mut console).await
    };

    let second = async {
        assert!(wait_until(Duration::from_secs(5), || paths.pipe_path().exists()).await);

        let again = Guardian::new(test_config(dir.path(), 1), sleeping_workers());
        let mut console = Console::plain(std::io::sink());
        let err = again.run(&mut console).await.err().unwrap();
        assert!(matches!(err, GuardianError::AlreadyRunning));

        // The running guardian is untouched.
        assert!(paths.pipe_path().exists());
        let client = ControlClient::connect(paths.pipe_path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(client.request(Action::Stop).await.unwrap().ok);
    };

    let (result, ()) = tokio::join!(server, second);
    result.unwrap();
    assert!(!paths.lock_path().exists());
}
