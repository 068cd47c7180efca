//! Control channel errors.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::frame::FrameError;

/// Errors raised while talking over the control channel.
#[derive(Debug)]
pub enum ChannelError {
    /// No server behind the channel path (missing file or refused connection).
    Unavailable { path: PathBuf },
    /// The channel file exists but could not be opened.
    Connect { path: PathBuf, error: io::Error },
    /// Read or write failure on an open channel.
    Io(io::Error),
    /// No reply arrived for a pending command in time.
    Timeout { id: String, after: Duration },
    /// The peer closed the channel before replying.
    Closed,
    /// Payload could not be framed.
    Frame(FrameError),
    /// Payload was not a valid command envelope.
    Decode(serde_json::Error),
}

impl ChannelError {
    /// True when the error means "no server is running".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ChannelError::Unavailable { .. })
    }

    /// Classify a connect failure: missing or refusing sockets mean no server.
    pub(crate) fn from_connect(path: PathBuf, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                ChannelError::Unavailable { path }
            }
            _ => ChannelError::Connect { path, error },
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Unavailable { path } => {
                write!(f, "control channel {} unavailable", path.display())
            }
            ChannelError::Connect { path, error } => {
                write!(f, "cannot open control channel {}: {}", path.display(), error)
            }
            ChannelError::Io(e) => write!(f, "control channel I/O error: {}", e),
            ChannelError::Timeout { id, after } => {
                write!(f, "command {} timed out after {}ms", id, after.as_millis())
            }
            ChannelError::Closed => write!(f, "control channel closed"),
            ChannelError::Frame(e) => write!(f, "{}", e),
            ChannelError::Decode(e) => write!(f, "invalid command payload: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Connect { error, .. } => Some(error),
            ChannelError::Io(e) => Some(e),
            ChannelError::Frame(e) => Some(e),
            ChannelError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        ChannelError::Io(e)
    }
}

impl From<FrameError> for ChannelError {
    fn from(e: FrameError) -> Self {
        ChannelError::Frame(e)
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Decode(e)
    }
}
