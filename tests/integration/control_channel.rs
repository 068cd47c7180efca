//! Control channel over a real UNIX socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ripple_drive::control::{
    Action, ChannelError, Command, CommandHandler, ControlClient, ControlServer, Reply,
};
use tokio::sync::watch;

#[derive(Default)]
struct Counting {
    reloads: AtomicUsize,
}

#[async_trait]
impl CommandHandler for Counting {
    async fn handle(&self, action: Action) -> Reply {
        match action {
            Action::Reload => {
                let n = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
                Reply::ok(format!("reload {}", n))
            }
            Action::Status => {
                // Slow enough that later commands overtake it.
                tokio::time::sleep(Duration::from_millis(200)).await;
                Reply::ok("status")
            }
            other => Reply::error(format!("{} not supported", other)),
        }
    }
}

#[tokio::test]
async fn test_requests_correlate_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ripple.pipe");

    let server = ControlServer::bind(&path).unwrap();
    let handler = Arc::new(Counting::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve = tokio::spawn(server.serve(Arc::clone(&handler), shutdown_rx));

    let client = ControlClient::connect(&path, Duration::from_secs(5)).await.unwrap();
    let (status, first, second) = tokio::join!(
        client.request(Action::Status),
        client.request(Action::Reload),
        client.request(Action::Reload),
    );

    assert_eq!(status.unwrap(), Reply::ok("status"));
    let mut reloads = vec![first.unwrap().message, second.unwrap().message];
    reloads.sort();
    assert_eq!(reloads, vec!["reload 1", "reload 2"]);
    assert_eq!(client.pending(), 0);

    let stop = client.request(Action::Stop).await.unwrap();
    assert!(!stop.ok);
    assert_eq!(stop.message, "stop not supported");

    client.close().await.unwrap();
    shutdown_tx.send(true).unwrap();
    serve.await.unwrap();
}

#[tokio::test]
async fn test_raw_command_envelope_keeps_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ripple.pipe");

    let server = ControlServer::bind(&path).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.serve(Arc::new(Counting::default()), shutdown_rx));

    let client = ControlClient::connect(&path, Duration::from_secs(5)).await.unwrap();
    let command = Command::new(Action::Reload);
    let id = command.id.clone();

    let response = client.send(command).await.unwrap();
    assert_eq!(response.id, id);
    assert!(response.is_response());
    assert_eq!(response.reply().unwrap(), Reply::ok("reload 1"));
}

#[tokio::test]
async fn test_connect_without_server_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ripple.pipe");

    let err = ControlClient::connect(&path, Duration::from_secs(1))
        .await
        .err()
        .unwrap();
    assert!(err.is_unavailable());

    // A leftover socket file with no listener behind it.
    let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
    drop(stale);
    let err = ControlClient::connect(&path, Duration::from_secs(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChannelError::Unavailable { .. }));
}
