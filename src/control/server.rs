//! Guardian side of the control channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use super::{Action, ChannelError, Command, Reply};
use crate::frame::FrameCodec;

/// How long open connections may keep running after shutdown.
pub const CONNECTION_DRAIN: Duration = Duration::from_secs(2);

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Dispatch target for decoded commands.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, action: Action) -> Reply;
}

/// Listening end of the control channel, bound at the channel path.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind at `path`, replacing a stale file left by a dead server.
    ///
    /// Callers must hold the server lock so a live channel is never removed.
    pub fn bind(path: &Path) -> Result<Self, ChannelError> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale control channel"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ChannelError::Connect {
                    path: path.to_path_buf(),
                    error: e,
                })
            }
        }

        let listener = {
            let _umask = OwnerOnly::set();
            UnixListener::bind(path)
        }
        .map_err(|error| ChannelError::Connect {
            path: path.to_path_buf(),
            error,
        })?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips to true, then give open
    /// connections up to [`CONNECTION_DRAIN`] to deliver pending replies.
    pub async fn serve<H: CommandHandler>(self, handler: Arc<H>, shutdown: watch::Receiver<bool>) {
        self.serve_with_drain(handler, shutdown, CONNECTION_DRAIN).await
    }

    pub async fn serve_with_drain<H: CommandHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
        drain: Duration,
    ) {
        let mut connections = JoinSet::new();

        while !*shutdown.borrow() {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            connections.spawn(handle_connection(stream, Arc::clone(&handler)));
                        }
                        Err(e) => {
                            error!(error = %e, "control channel accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(open = connections.len(), "control channel stopped accepting");
        drop(self.listener);

        let drained = tokio::time::timeout(drain, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open = connections.len(), "closing control connections after drain timeout");
            connections.shutdown().await;
        }
    }
}

/// Clears group and other permission bits for files created while alive.
struct OwnerOnly(libc::mode_t);

impl OwnerOnly {
    fn set() -> Self {
        // SAFETY: umask(2) only swaps the process file mode mask.
        Self(unsafe { libc::umask(0o177) })
    }
}

impl Drop for OwnerOnly {
    fn drop(&mut self) {
        // SAFETY: restores the mask saved by `set`.
        unsafe {
            libc::umask(self.0);
        }
    }
}

/// Serve one peer: decode commands, dispatch each concurrently, write
/// responses back in completion order.
pub async fn handle_connection<T, H>(io: T, handler: Arc<H>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    H: CommandHandler,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    let mut sink = FramedWrite::new(write_half, FrameCodec::new());

    let (tx, mut rx) = mpsc::channel::<Command>(16);

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let payload = match response.to_payload() {
                Ok(payload) => Bytes::from(payload),
                Err(e) => {
                    error!(id = %response.id, error = %e, "cannot encode response");
                    continue;
                }
            };
            if let Err(e) = sink.send(payload).await {
                debug!(error = %e, "control peer went away");
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "control channel read failed");
                break;
            }
        };

        let command = match Command::from_payload(&payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable command");
                continue;
            }
        };

        if command.is_response() {
            debug!(id = %command.id, "ignoring echoed response");
            continue;
        }

        let tx = tx.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let reply = match command.action() {
                Ok(action) => {
                    debug!(id = %command.id, action = %action, "control command");
                    handler.handle(action).await
                }
                Err(e) => Reply::error(e.to_string()),
            };
            match command.respond(&reply) {
                Ok(response) => {
                    let _ = tx.send(response).await;
                }
                Err(e) => error!(error = %e, "cannot attach reply"),
            }
        });
    }

    drop(tx);
    let _ = writer.await;
}
