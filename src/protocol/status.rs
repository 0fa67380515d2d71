//! Hub status as seen by the host.

use std::fmt;

use super::wire_format::{STATUS_ERROR, STATUS_IDLE, STATUS_RUNNING};

/// Hub status.
///
/// `Idle`, `Running` and `Error` mirror the hub's status tokens.
/// `AwaitingChecksum` is host-side only and marks the handshake window in
/// which inbound bytes are checksum replies instead of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HubStatus {
    /// Not connected, or no status line seen yet.
    #[default]
    Unknown,
    /// Hub is waiting for a program.
    Idle,
    /// A program is running.
    Running,
    /// The last program stopped with an error.
    Error,
    /// Host is waiting for a checksum byte.
    AwaitingChecksum,
}

impl HubStatus {
    /// Map a complete line to the status it announces, if it is a status token.
    ///
    /// Only exact matches count; a token embedded in other text is plain output.
    pub fn from_token(line: &[u8]) -> Option<Self> {
        match line {
            STATUS_IDLE => Some(HubStatus::Idle),
            STATUS_RUNNING => Some(HubStatus::Running),
            STATUS_ERROR => Some(HubStatus::Error),
            _ => None,
        }
    }

    /// Whether a program is currently running.
    #[inline]
    pub fn is_running(self) -> bool {
        self == HubStatus::Running
    }
}

impl fmt::Display for HubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubStatus::Unknown => "unknown",
            HubStatus::Idle => "idle",
            HubStatus::Running => "running",
            HubStatus::Error => "error",
            HubStatus::AwaitingChecksum => "awaiting checksum",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_token() {
        assert_eq!(HubStatus::from_token(b">>>> IDLE"), Some(HubStatus::Idle));
        assert_eq!(
            HubStatus::from_token(b">>>> RUNNING"),
            Some(HubStatus::Running)
        );
        assert_eq!(HubStatus::from_token(b">>>> ERROR"), Some(HubStatus::Error));
    }

    #[test]
    fn test_from_token_requires_exact_match() {
        assert_eq!(HubStatus::from_token(b">>>> IDLE "), None);
        assert_eq!(HubStatus::from_token(b"x >>>> RUNNING"), None);
        assert_eq!(HubStatus::from_token(b""), None);
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(HubStatus::default(), HubStatus::Unknown);
        assert!(!HubStatus::default().is_running());
    }
}
