//! Structured link events.
//!
//! Callers (and tests) can observe what the link does without parsing log
//! text by installing an event channel:
//!
//! ```
//! use hublink::events::{EventSink, LinkEvent};
//!
//! let (sink, mut rx) = EventSink::channel();
//! sink.emit(LinkEvent::Progress { sent: 1, total: 3 });
//!
//! assert_eq!(rx.try_recv().unwrap(), LinkEvent::Progress { sent: 1, total: 3 });
//! ```

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::HubStatus;

/// Something observable that happened on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Hub status changed.
    StatusChanged { from: HubStatus, to: HubStatus },
    /// A complete line arrived (terminator stripped).
    LineReceived(Bytes),
    /// A checksum handshake resolved with this reply.
    ChecksumReply { expected: u8, received: Option<u8> },
    /// Program upload progress, counted in protocol messages.
    Progress { sent: usize, total: usize },
    /// A log capture started.
    LogOpened { name: String },
    /// A log capture finished.
    LogClosed { name: String },
    /// The inbound pipeline rejected a line.
    Fault(String),
    /// The transport went away.
    Disconnected,
}

/// Cheaply cloneable event emitter.
///
/// A disabled sink drops events; a closed receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl EventSink {
    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Sink feeding the given channel.
    pub fn new(tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emit an event.
    #[inline]
    pub fn emit(&self, event: LinkEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sink_drops_events() {
        let sink = EventSink::disabled();
        sink.emit(LinkEvent::Disconnected);
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(LinkEvent::Disconnected);
    }

    #[test]
    fn test_clone_shares_channel() {
        let (sink, mut rx) = EventSink::channel();
        let other = sink.clone();

        sink.emit(LinkEvent::LogOpened {
            name: "a.txt".to_string(),
        });
        other.emit(LinkEvent::LogClosed {
            name: "a.txt".to_string(),
        });

        assert!(matches!(rx.try_recv(), Ok(LinkEvent::LogOpened { .. })));
        assert!(matches!(rx.try_recv(), Ok(LinkEvent::LogClosed { .. })));
    }
}
