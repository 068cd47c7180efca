//! 0x7E framing for the control channel.
//!
//! Every message travelling over the control channel is wrapped in a
//! self-delimiting frame:
//!
//! ```text
//! ┌──────┬──────────────┬─────────────────┬──────────┬──────┐
//! │ 0x7E │ len (u16 BE) │ payload (len B) │ xor (u8) │ 0x7E │
//! └──────┴──────────────┴─────────────────┴──────────┴──────┘
//! ```
//!
//! The checksum is the XOR of all payload bytes.
//!
//! Byte-stream transports deliver arbitrary chunk boundaries, so decoding
//! is restartable: [`FrameDecoder`] buffers a partial tail and resumes on
//! the next chunk, and [`FrameCodec`] plugs the same logic into
//! `tokio_util::codec::Framed`.
//!
//! # Example
//!
//! ```rust
//! use ripple_drive::frame::{decode_frame, encode_frame, FrameDecoder};
//!
//! let frame = encode_frame(b"reload").unwrap();
//! assert_eq!(decode_frame(&frame).unwrap(), &b"reload"[..]);
//!
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.decode_stream(&frame[..3]).is_empty());
//! assert_eq!(decoder.decode_stream(&frame[3..]), vec![&b"reload"[..]]);
//! ```

mod codec;
mod error;

pub use codec::FrameCodec;
pub use error::FrameError;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

/// Header sentinel.
pub const FRAME_HEADER: u8 = 0x7E;

/// Footer sentinel.
pub const FRAME_FOOTER: u8 = 0x7E;

/// Header byte + 2 length bytes + checksum byte + footer byte.
pub const FRAME_OVERHEAD: usize = 5;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// XOR of all payload bytes.
#[inline]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a payload into a complete frame.
///
/// The output is always `payload.len() + 5` bytes long.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut dst = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    encode_into(payload, &mut dst)?;
    Ok(dst.freeze())
}

pub(crate) fn encode_into(payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge { len: payload.len() });
    }

    dst.reserve(payload.len() + FRAME_OVERHEAD);
    dst.put_u8(FRAME_HEADER);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    dst.put_u8(checksum(payload));
    dst.put_u8(FRAME_FOOTER);
    Ok(())
}

/// Decode exactly one frame.
///
/// `frame` must be exactly `len + 5` bytes. Fails when a sentinel is wrong,
/// the frame is shorter or longer than its declared length, or the
/// checksum does not match.
pub fn decode_frame(frame: &[u8]) -> Result<Bytes, FrameError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FrameError::Truncated {
            expected: FRAME_OVERHEAD,
            actual: frame.len(),
        });
    }
    if frame[0] != FRAME_HEADER {
        return Err(FrameError::Boundary);
    }

    let len = declared_len(frame);
    let expected = len + FRAME_OVERHEAD;
    if frame.len() < expected {
        return Err(FrameError::Truncated {
            expected,
            actual: frame.len(),
        });
    }
    if frame.len() != expected || frame[expected - 1] != FRAME_FOOTER {
        return Err(FrameError::Boundary);
    }

    let payload = &frame[3..3 + len];
    let stored = frame[3 + len];
    let actual = checksum(payload);
    if stored != actual {
        return Err(FrameError::Checksum {
            expected: stored,
            actual,
        });
    }

    Ok(Bytes::copy_from_slice(payload))
}

/// Length field of a frame starting at `bytes[0]`; needs 3 bytes.
fn declared_len(bytes: &[u8]) -> usize {
    u16::from_be_bytes([bytes[1], bytes[2]]) as usize
}

/// Offset of the first header after `buf[0]` that starts a complete,
/// valid frame.
fn next_valid_frame(buf: &[u8]) -> Option<usize> {
    (1..buf.len()).find(|&start| {
        let candidate = &buf[start..];
        if candidate[0] != FRAME_HEADER || candidate.len() < FRAME_OVERHEAD {
            return false;
        }
        let total = declared_len(candidate) + FRAME_OVERHEAD;
        candidate.len() >= total && decode_frame(&candidate[..total]).is_ok()
    })
}

/// Pull the next complete frame off the front of `buf`.
///
/// Returns `None` when more bytes are needed. Leading bytes that are not
/// a header are discarded. A frame whose footer lines up but whose
/// checksum fails is consumed whole; any other corrupt frame only loses
/// its header byte, so decoding resynchronizes on the next sentinel
/// instead of trusting a damaged length. While a frame is incomplete, a
/// complete valid frame buffered behind its header means the length was
/// damaged: decoding skips ahead to that frame rather than waiting.
pub(crate) fn take_frame(buf: &mut BytesMut) -> Option<Result<Bytes, FrameError>> {
    match buf.iter().position(|&b| b == FRAME_HEADER) {
        Some(0) => {}
        Some(skip) => buf.advance(skip),
        None => {
            buf.clear();
            return None;
        }
    }

    if buf.len() < 3 {
        return None;
    }

    let total = declared_len(buf) + FRAME_OVERHEAD;
    if buf.len() < total {
        if let Some(start) = next_valid_frame(buf) {
            buf.advance(start);
            return Some(Err(FrameError::Boundary));
        }
        buf.reserve(total - buf.len());
        return None;
    }

    match decode_frame(&buf[..total]) {
        Ok(payload) => {
            buf.advance(total);
            Some(Ok(payload))
        }
        Err(e @ FrameError::Checksum { .. }) => {
            buf.advance(total);
            Some(Err(e))
        }
        Err(e) => {
            buf.advance(1);
            Some(Err(e))
        }
    }
}

/// Restartable stream decoder.
///
/// Feed successive chunks with [`FrameDecoder::decode_stream`]; complete
/// payloads are returned in order and any partial tail is kept for the
/// next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Append `chunk` and drain every complete frame.
    ///
    /// Corrupt frames are logged and skipped; decoding continues with the
    /// remaining buffered bytes.
    pub fn decode_stream(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(result) = take_frame(&mut self.buffer) {
            match result {
                Ok(payload) => payloads.push(payload),
                Err(e) => warn!(error = %e, "dropping corrupt control frame"),
            }
        }
        payloads
    }

    /// Bytes buffered while waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
