//! Frame error types.

use std::fmt;

/// Errors raised while encoding or decoding a control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload does not fit the 16-bit length field.
    PayloadTooLarge {
        /// Actual payload length.
        len: usize,
    },

    /// Frame is shorter than its header plus declared payload.
    Truncated {
        /// Bytes required for a complete frame.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Header or footer byte is not the 0x7E sentinel.
    Boundary,

    /// Stored checksum does not match the XOR of the payload.
    Checksum {
        /// Checksum carried by the frame.
        expected: u8,
        /// Checksum computed over the received payload.
        actual: u8,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::PayloadTooLarge { len } => {
                write!(f, "payload of {} bytes exceeds the 65535 byte frame limit", len)
            }
            FrameError::Truncated { expected, actual } => {
                write!(f, "truncated frame: expected {} bytes, got {}", expected, actual)
            }
            FrameError::Boundary => write!(f, "invalid frame: missing header or footer"),
            FrameError::Checksum { expected, actual } => write!(
                f,
                "invalid frame: checksum mismatch (frame {:#04x}, payload {:#04x})",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<FrameError> for std::io::Error {
    fn from(e: FrameError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameError::PayloadTooLarge { len: 70000 };
        assert!(err.to_string().contains("70000"));

        let err = FrameError::Checksum {
            expected: 0x10,
            actual: 0x11,
        };
        assert!(err.to_string().contains("0x10"));
    }

    #[test]
    fn test_into_io_error() {
        let err: std::io::Error = FrameError::Boundary.into();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
