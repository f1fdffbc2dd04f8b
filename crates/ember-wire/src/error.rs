//! Wire-level error types.

/// Errors from frame and payload encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a frame.
    #[error("connection closed mid-frame")]
    Closed,

    /// An inbound frame carried an opcode this client does not know.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// A payload ended before all declared fields were read.
    #[error("truncated payload: needed {needed} more bytes, {available} available")]
    Truncated {
        /// Bytes the next field required.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// A payload field held a value outside its domain.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_io_display() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let err = WireError::from(io);
        assert!(err.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_closed_display() {
        assert_eq!(WireError::Closed.to_string(), "connection closed mid-frame");
    }

    #[test]
    fn error_unknown_opcode_display() {
        assert_eq!(WireError::UnknownOpcode(0xfe).to_string(), "unknown opcode 0xfe");
    }

    #[test]
    fn error_truncated_display() {
        let err = WireError::Truncated {
            needed: 4,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "truncated payload: needed 4 more bytes, 1 available"
        );
    }

    #[test]
    fn error_invalid_payload_display() {
        let err = WireError::InvalidPayload("bad literal tag".into());
        assert_eq!(err.to_string(), "invalid payload: bad literal tag");
    }
}
