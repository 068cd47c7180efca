//! CLI commands against a project with no running server.

use clap::Parser;
use ripple_drive::cli::{self, Cli};
use ripple_drive::guardian::RuntimePaths;

use crate::helpers::plain;

async fn run(args: &[&str]) -> String {
    let cli = Cli::try_parse_from(args).expect("valid command line");
    let mut out = Vec::new();
    cli::run(cli, &mut out).await.expect("command failed");
    plain(&out)
}

#[tokio::test]
async fn test_commands_report_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().to_str().unwrap();

    for action in ["status", "reload", "stop"] {
        let output = run(&["ripple", "--project", project, "server", action]).await;
        assert!(
            output.contains("The server is not running"),
            "{} printed {:?}",
            action,
            output
        );
    }

    // Querying a stopped server leaves no runtime artefacts behind.
    let paths = RuntimePaths::for_project(dir.path());
    assert!(!paths.runtime_dir().exists());
}

#[tokio::test]
async fn test_stale_channel_file_is_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::for_project(dir.path());
    paths.ensure_dirs().unwrap();
    drop(std::os::unix::net::UnixListener::bind(paths.pipe_path()).unwrap());

    let project = dir.path().to_str().unwrap();
    let output = run(&["ripple", "--project", project, "server", "status"]).await;
    assert!(output.contains("The server is not running"));
}
