//! Application request handler seam.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};

/// Per-request execution context, passed explicitly to the handler.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Supervisor-assigned worker key.
    pub worker_id: u64,
    pub pid: u32,
    /// Project root the application is served from.
    pub project_path: Arc<Path>,
    /// Unique id of this request (also sent back as `x-request-id`).
    pub request_id: String,
    pub remote_addr: SocketAddr,
}

/// Error returned by a request handler. Turned into a 500 response.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request handler failed: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<http::Error> for HandlerError {
    fn from(e: http::Error) -> Self {
        HandlerError::new(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::new(e.to_string())
    }
}

/// Turns one buffered request into a response.
///
/// Framework adapters implement this. Errors and panics are isolated to
/// the request that caused them.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: WorkerContext,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, HandlerError>;
}

/// Default handler: reports which worker served the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubHandler;

#[async_trait]
impl RequestHandler for StubHandler {
    async fn handle(
        &self,
        ctx: WorkerContext,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, HandlerError> {
        let body = serde_json::json!({
            "worker": ctx.worker_id,
            "pid": ctx.pid,
            "request_id": ctx.request_id,
            "method": request.method().as_str(),
            "path": request.uri().path(),
        });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(Bytes::from(serde_json::to_vec(&body)?))?)
    }
}
