//! A guardian running real `ripple worker` processes, exercised over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::StatusCode;
use ripple_drive::cli::{self, Cli};
use ripple_drive::console::Console;
use ripple_drive::control::{Action, ControlClient};
use ripple_drive::guardian::{Guardian, RuntimePaths};
use ripple_drive::worker::ProcessSpawner;
use ripple_drive::Config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::helpers::{plain, test_config, wait_until};

fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn serving_guardian(config: Config) -> Guardian {
    let spawner = ProcessSpawner::new(env!("CARGO_BIN_EXE_ripple")).envs(config.worker_env());
    Guardian::new(config, Arc::new(spawner))
}

async fn cli_output(project: &str, action: &str) -> String {
    let cli = Cli::try_parse_from(["ripple", "--project", project, "server", action]).unwrap();
    let mut out = Vec::new();
    cli::run(cli, &mut out).await.unwrap();
    plain(&out)
}

/// Retry GET until a worker answers or `timeout` passes.
async fn first_response(addr: SocketAddr, timeout: Duration) -> reqwest::Response {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match client.get(format!("http://{}/hello", addr)).send().await {
            Ok(response) => return response,
            Err(e) if tokio::time::Instant::now() >= deadline => panic!("no worker answered: {}", e),
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

async fn live_pids(paths: &RuntimePaths) -> Vec<u32> {
    let client = ControlClient::connect(paths.pipe_path(), Duration::from_secs(5))
        .await
        .unwrap();
    let status = client.request(Action::Status).await.unwrap().status.unwrap();
    let _ = client.close().await;
    status.workers.iter().filter_map(|w| w.pid).collect()
}

#[tokio::test]
async fn test_workers_serve_http_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().to_str().unwrap().to_string();
    let port = free_port();
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let config = test_config(dir.path(), 2)
        .with_listen(format!("http://127.0.0.1:{}", port).parse().unwrap());
    let guardian = serving_guardian(config);
    let paths = guardian.paths().clone();

    let server = async {
        let mut console = Console::plain(std::io::sink());
        guardian.run(&mut console).await
    };

    let operator = async {
        assert!(wait_until(Duration::from_secs(5), || paths.pipe_path().exists()).await);

        let response = first_response(addr, Duration::from_secs(10)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = response.text().await.unwrap();
        assert!(body.contains("\"path\":\"/hello\""), "{:?}", body);

        let pids = live_pids(&paths).await;
        let served: serde_json::Value = serde_json::from_str(&body).unwrap();
        let pid = served["pid"].as_u64().unwrap() as u32;
        assert!(pids.contains(&pid), "pid {} not in {:?}", pid, pids);

        let stop = cli_output(&project, "stop").await;
        assert!(stop.contains("server stopped"), "{:?}", stop);

        let status = cli_output(&project, "status").await;
        assert!(status.contains("The server is not running"), "{:?}", status);
    };

    let (result, ()) = tokio::join!(server, operator);
    result.unwrap();
    assert!(!paths.lock_path().exists());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_request_in_flight_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().to_str().unwrap().to_string();
    let port = free_port();
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let config = test_config(dir.path(), 1)
        .with_listen(format!("http://127.0.0.1:{}", port).parse().unwrap());
    let guardian = serving_guardian(config);
    let paths = guardian.paths().clone();

    let server = async {
        let mut console = Console::plain(std::io::sink());
        guardian.run(&mut console).await
    };

    let operator = async {
        assert!(wait_until(Duration::from_secs(5), || paths.pipe_path().exists()).await);
        assert_eq!(
            first_response(addr, Duration::from_secs(10)).await.status(),
            StatusCode::OK
        );
        let before = live_pids(&paths).await;
        assert_eq!(before.len(), 1);

        // Headers and half the body reach the old worker before the reload.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\n\
                  Connection: close\r\n\r\nab",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reload = cli_output(&project, "reload").await;
        assert!(reload.contains("The server is reloading"), "{:?}", reload);
        tokio::time::sleep(Duration::from_millis(300)).await;

        stream.write_all(b"cd").await.unwrap();
        let mut raw = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        let raw = String::from_utf8_lossy(&raw);
        assert!(raw.starts_with("HTTP/1.1 200"), "{:?}", raw);
        assert!(raw.contains(&format!("\"pid\":{}", before[0])), "{:?}", raw);

        // The drained worker exits and a fresh one takes over.
        let mut replaced = false;
        for _ in 0..100 {
            let now = live_pids(&paths).await;
            if now.len() == 1 && now[0] != before[0] {
                replaced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(replaced);

        let stop = cli_output(&project, "stop").await;
        assert!(stop.contains("server stopped"), "{:?}", stop);
    };

    let (result, ()) = tokio::join!(server, operator);
    result.unwrap();
}
