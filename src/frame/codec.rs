//! `tokio_util` codec adapter for control frames.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{encode_into, take_frame};

/// Codec yielding one payload per decoded frame.
///
/// Corrupt frames are skipped rather than surfaced as stream errors, so a
/// single damaged frame never tears down the connection it arrived on.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match take_frame(src) {
                Some(Ok(payload)) => return Ok(Some(payload)),
                Some(Err(e)) => warn!(error = %e, "dropping corrupt control frame"),
                None => return Ok(None),
            }
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(item.as_ref(), dst)?;
        Ok(())
    }
}
