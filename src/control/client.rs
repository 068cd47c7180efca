//! CLI side of the control channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::{Action, ChannelError, Command, Reply};
use crate::frame::FrameCodec;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Command>>>>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// Sends commands and correlates replies by command id.
///
/// Replies may arrive in any order. Every request registers a pending
/// entry that is resolved by the reader task or dropped on timeout.
pub struct ControlClient {
    writer: tokio::sync::Mutex<Writer>,
    pending: Pending,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl ControlClient {
    /// Connect to a running server at `path`.
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self, ChannelError> {
        if !path.exists() {
            return Err(ChannelError::Unavailable {
                path: path.to_path_buf(),
            });
        }

        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ChannelError::from_connect(path.to_path_buf(), e))?;
        debug!(path = %path.display(), "control channel connected");

        Ok(Self::new(stream, timeout))
    }

    /// Wrap an already open duplex stream.
    pub fn new<T>(io: T, timeout: Duration) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(read_replies(
            FramedRead::new(read_half, FrameCodec::new()),
            Arc::clone(&pending),
        ));

        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        Self {
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, FrameCodec::new())),
            pending,
            timeout,
            reader,
        }
    }

    /// Send `action` and wait for its reply.
    pub async fn request(&self, action: Action) -> Result<Reply, ChannelError> {
        self.send(Command::new(action)).await?.reply()
    }

    /// Send a raw envelope and wait for the echoed response.
    pub async fn send(&self, command: Command) -> Result<Command, ChannelError> {
        let payload = Bytes::from(command.to_payload()?);
        let id = command.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending_table().insert(id.clone(), tx);

        let written = {
            let mut writer = self.writer.lock().await;
            writer.send(payload).await
        };
        if let Err(e) = written {
            self.pending_table().remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.pending_table().remove(&id);
                Err(ChannelError::Timeout {
                    id,
                    after: self.timeout,
                })
            }
        }
    }

    /// Number of commands still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending_table().len()
    }

    /// Shut down the write half. Frames are flushed as they are sent.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        Ok(())
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Command>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies<R>(mut frames: FramedRead<R, FrameCodec>, pending: Pending)
where
    R: AsyncRead + Unpin,
{
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
                warn!(error = %e, "ignoring undecodable reply");
                continue;
            }
        };

        if !command.is_response() {
            debug!(id = %command.id, "ignoring command without result");
            continue;
        }

        let waiter = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&command.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(command);
            }
            None => debug!(id = %command.id, "reply for unknown or expired command"),
        }
    }

    // Dropping the senders wakes every waiter with `Closed`.
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}
