//! HTTP accept loop of a single worker process.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming as IncomingBody;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{RequestHandler, WorkerContext};

const X_REQUEST_ID: &str = "x-request-id";

/// Default cap on a buffered request body.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Check if an error is a common connection reset or timeout.
#[inline]
fn is_connection_error(err_str: &str) -> bool {
    err_str.contains("connection reset")
        || err_str.contains("broken pipe")
        || err_str.contains("Connection reset")
        || err_str.contains("os error 104")
        || err_str.contains("os error 32")
        || err_str.contains("timed out")
}

/// Serves HTTP on one listener through a [`RequestHandler`].
pub struct WorkerServer {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    worker_id: u64,
    project_path: Arc<Path>,
    body_limit: usize,
    active_connections: Arc<AtomicUsize>,
}

impl WorkerServer {
    pub fn new(
        listener: TcpListener,
        handler: Arc<dyn RequestHandler>,
        worker_id: u64,
        project_path: &Path,
    ) -> Self {
        Self {
            listener,
            handler,
            worker_id,
            project_path: Arc::from(project_path),
            body_limit: MAX_BODY_BYTES,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reject request bodies larger than `limit` bytes with 413.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` flips, then let open connections finish for
    /// at most `drain`.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>, drain: Duration) {
        let conn_shutdown = shutdown.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, remote_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(worker = self.worker_id, error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);

                    let conn = Connection {
                        handler: Arc::clone(&self.handler),
                        worker_id: self.worker_id,
                        project_path: Arc::clone(&self.project_path),
                        body_limit: self.body_limit,
                        remote_addr,
                    };
                    let active = Arc::clone(&self.active_connections);
                    let shutdown = conn_shutdown.clone();

                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        conn.serve(stream, shutdown).await;
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(worker = self.worker_id, "stopped accepting");
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        if !wait_for_drain(&self.active_connections, drain).await {
            warn!(
                worker = self.worker_id,
                connections = self.active_connections.load(Ordering::Relaxed),
                "drain timeout reached"
            );
        }
    }
}

/// Wait for all active connections to drain.
/// Returns true if drained, false if the timeout was reached.
async fn wait_for_drain(active: &AtomicUsize, timeout: Duration) -> bool {
    let start = Instant::now();
    let check_interval = Duration::from_millis(50);

    loop {
        if active.load(Ordering::Relaxed) == 0 {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(check_interval).await;
    }
}

struct Connection {
    handler: Arc<dyn RequestHandler>,
    worker_id: u64,
    project_path: Arc<Path>,
    body_limit: usize,
    remote_addr: SocketAddr,
}

impl Connection {
    async fn serve(self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let conn = Arc::new(self);
        let service_conn = Arc::clone(&conn);
        let service = service_fn(move |req| {
            let conn = Arc::clone(&service_conn);
            async move { conn.handle_request(req).await }
        });

        let builder = auto::Builder::new(TokioExecutor::new());
        let serving = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(serving);

        let result = tokio::select! {
            result = serving.as_mut() => result,
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                serving.as_mut().graceful_shutdown();
                serving.await
            }
        };

        if let Err(err) = result {
            let err_str = format!("{:?}", err);
            if !is_connection_error(&err_str) {
                debug!(remote = %conn.remote_addr, "connection error: {:?}", err);
            }
        }
    }

    async fn handle_request(
        &self,
        req: Request<IncomingBody>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let ctx = WorkerContext {
            worker_id: self.worker_id,
            pid: std::process::id(),
            project_path: Arc::clone(&self.project_path),
            request_id: Uuid::new_v4().to_string(),
            remote_addr: self.remote_addr,
        };
        let request_id = ctx.request_id.clone();

        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(request_id = %request_id, limit = self.body_limit, "request body too large");
                return Ok(text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Payload Too Large",
                    &request_id,
                ));
            }
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "failed to read request body");
                return Ok(text_response(StatusCode::BAD_REQUEST, "Bad Request", &request_id));
            }
        };
        let request = Request::from_parts(parts, body);

        let outcome = AssertUnwindSafe(self.handler.handle(ctx, request))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    parts.headers.insert(X_REQUEST_ID, value);
                }
                Response::from_parts(parts, Full::new(body))
            }
            Ok(Err(e)) => {
                error!(request_id = %request_id, error = %e, "request failed");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    &request_id,
                )
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(request_id = %request_id, panic = %message, "request handler panicked");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    &request_id,
                )
            }
        };

        Ok(response)
    }
}

fn text_response(status: StatusCode, body: &'static str, request_id: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Log the listening banner of a worker.
pub(crate) fn log_listening(worker_id: u64, addr: SocketAddr) {
    info!(worker = worker_id, pid = std::process::id(), "listening on http://{}", addr);
}
