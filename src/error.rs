//! Error types for hublink.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Phase of a high-level operation in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Scanning for the hub by name.
    Scan,
    /// Opening the transport and subscribing to notifications.
    Connect,
    /// Sending the 4-byte program length message.
    Length,
    /// Sending the program chunk with this zero-based index.
    Chunk(usize),
    /// Waiting for the hub to leave the running state.
    RunWait,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Scan => f.write_str("scan"),
            Phase::Connect => f.write_str("connect"),
            Phase::Length => f.write_str("length message"),
            Phase::Chunk(index) => write!(f, "chunk {}", index),
            Phase::RunWait => f.write_str("run wait"),
        }
    }
}

/// Main error type for all hub link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport could not connect, subscribe or write.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Message payload is empty or larger than one protocol message.
    #[error("Message of {len} bytes does not fit in a protocol message (1..={max})")]
    ValueTooLarge { len: usize, max: usize },

    /// No checksum byte arrived within the handshake window.
    #[error("Hub did not return checksum within {0:?}")]
    ChecksumTimeout(Duration),

    /// Hub echoed a checksum that differs from the one computed locally.
    #[error("Checksum mismatch: expected {expected:#04x}, received {received:#04x}")]
    ChecksumMismatch { expected: u8, received: u8 },

    /// Hub answered the handshake with an empty fragment.
    #[error("Did not receive reply")]
    NoReply,

    /// Log capture markers arrived out of order, or carried a bad filename.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Received line is not valid UTF-8.
    #[error("Decode error: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// Scan finished without finding a matching device.
    #[error("Could not find {name} in {timeout:?}")]
    NotFound { name: String, timeout: Duration },

    /// I/O error while writing output or log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration values are inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Connection closed, or operation attempted after disconnect.
    #[error("Disconnected")]
    Disconnected,

    /// Failure tagged with the phase of the enclosing operation.
    #[error("{phase} failed: {source}")]
    InPhase {
        phase: Phase,
        #[source]
        source: Box<LinkError>,
    },
}

impl LinkError {
    /// Tag this error with the phase it happened in.
    pub fn in_phase(self, phase: Phase) -> Self {
        LinkError::InPhase {
            phase,
            source: Box::new(self),
        }
    }

    /// Outermost phase tag, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            LinkError::InPhase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying error with all phase tags removed.
    pub fn root(&self) -> &LinkError {
        match self {
            LinkError::InPhase { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tagging() {
        let err = LinkError::NoReply.in_phase(Phase::Chunk(2));

        assert_eq!(err.phase(), Some(Phase::Chunk(2)));
        assert!(matches!(err.root(), LinkError::NoReply));
        assert_eq!(err.to_string(), "chunk 2 failed: Did not receive reply");
    }

    #[test]
    fn test_untagged_root_is_self() {
        let err = LinkError::ChecksumMismatch {
            expected: 0x10,
            received: 0x20,
        };

        assert_eq!(err.phase(), None);
        assert!(matches!(
            err.root(),
            LinkError::ChecksumMismatch { expected: 0x10, received: 0x20 }
        ));
        assert!(err.to_string().contains("0x10"));
    }
}
