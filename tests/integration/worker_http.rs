//! Worker servers sharing one address with SO_REUSEPORT.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use ripple_drive::worker::{create_reuse_port_listener, StubHandler, WorkerServer};
use tokio::net::TcpListener;
use tokio::sync::watch;

fn worker(addr: std::net::SocketAddr, id: u64) -> WorkerServer {
    let listener = TcpListener::from_std(create_reuse_port_listener(addr).unwrap()).unwrap();
    WorkerServer::new(listener, Arc::new(StubHandler), id, Path::new("/srv/app"))
}

#[tokio::test]
async fn test_two_workers_serve_one_address() {
    let first = worker("127.0.0.1:0".parse().unwrap(), 1);
    let addr = first.local_addr().unwrap();
    let second = worker(addr, 2);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let a = tokio::spawn(first.serve(shutdown_rx.clone(), Duration::from_secs(1)));
    let b = tokio::spawn(second.serve(shutdown_rx, Duration::from_secs(1)));

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let mut request_ids = HashSet::new();
    for _ in 0..8 {
        let response = client
            .get(format!("http://{}/hello", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        request_ids.insert(id);

        let body = response.text().await.unwrap();
        assert!(body.contains("\"path\":\"/hello\""));
    }
    assert_eq!(request_ids.len(), 8);

    shutdown_tx.send(true).unwrap();
    a.await.unwrap();
    b.await.unwrap();
}
