//! Inbound dispatcher.
//!
//! Every notification from the hub passes through [`Dispatcher::dispatch`],
//! which decides how to read it from the current status:
//!
//! - `AwaitingChecksum`: the last byte of the fragment is the checksum reply;
//!   it goes to the [`Mailbox`] and the rest of the fragment is ignored.
//! - otherwise: the fragment is appended to the line buffer, status tokens
//!   update the status, and every complete line goes to the line processor.
//!
//! The dispatcher owns all state shared between the inbound pump and the
//! outbound operations. The status, the line buffer and the processor with
//! its open log live behind one mutex, so a fragment is always read in the
//! phase that was current when its processing started. The `watch` channel
//! only mirrors the status for readers and waiters; every write to it happens
//! under that mutex.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{LinkError, Result};
use crate::events::{EventSink, LinkEvent};
use crate::mailbox::Mailbox;
use crate::processor::LineProcessor;
use crate::protocol::{HubStatus, LineBuffer};

struct Inbound {
    status: HubStatus,
    closed: bool,
    lines: LineBuffer,
    processor: LineProcessor,
}

/// Demultiplexes inbound fragments and tracks hub status.
pub struct Dispatcher {
    inbound: Mutex<Inbound>,
    status: watch::Sender<HubStatus>,
    mailbox: Mailbox,
    fault: Mutex<Option<LinkError>>,
    events: EventSink,
}

impl Dispatcher {
    /// Create a dispatcher in the `Unknown` status.
    pub fn new(processor: LineProcessor, events: EventSink) -> Self {
        let (status, _) = watch::channel(HubStatus::Unknown);
        Self {
            inbound: Mutex::new(Inbound {
                status: HubStatus::Unknown,
                closed: false,
                lines: LineBuffer::new(),
                processor,
            }),
            status,
            mailbox: Mailbox::new(),
            fault: Mutex::new(None),
            events,
        }
    }

    /// Handle one inbound fragment.
    ///
    /// The whole fragment is handled under the state lock. All complete lines
    /// are processed even if one of them fails; the first failure is returned.
    pub fn dispatch(&self, fragment: &[u8]) -> Result<()> {
        let mut inbound = lock(&self.inbound);

        if inbound.status == HubStatus::AwaitingChecksum {
            let reply = fragment.last().copied();
            tracing::debug!("CS: {:?}", reply);
            self.mailbox.deposit(reply);
            return Ok(());
        }

        let lines = inbound.lines.push(fragment);

        let mut first_error = None;
        for line in lines {
            tracing::debug!("RX: {:?}", String::from_utf8_lossy(&line));
            self.events.emit(LinkEvent::LineReceived(line.clone()));

            if let Some(status) = HubStatus::from_token(&line) {
                self.apply_status(&mut inbound, status);
            }

            if let Err(e) = inbound.processor.process(&line) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current status.
    pub fn status(&self) -> HubStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<HubStatus> {
        self.status.subscribe()
    }

    /// Record a new status if it differs from the current one.
    ///
    /// Callers hold the state lock.
    fn apply_status(&self, inbound: &mut Inbound, new: HubStatus) {
        let old = inbound.status;
        if old == new {
            return;
        }
        inbound.status = new;
        self.status.send_replace(new);

        tracing::debug!("New State: {}", new);
        self.events.emit(LinkEvent::StatusChanged { from: old, to: new });
    }

    /// Enter `AwaitingChecksum` with an empty mailbox.
    ///
    /// From here on every fragment is read as a checksum reply. Fails with
    /// `Disconnected` once the connection is closed.
    pub fn begin_handshake(&self) -> Result<()> {
        let mut inbound = lock(&self.inbound);
        if inbound.closed {
            return Err(LinkError::Disconnected);
        }
        self.mailbox.clear();
        self.apply_status(&mut inbound, HubStatus::AwaitingChecksum);
        Ok(())
    }

    /// Leave `AwaitingChecksum` for `Idle`.
    ///
    /// Does nothing if the status moved on meanwhile (e.g. a disconnect).
    pub fn finish_handshake(&self) {
        let mut inbound = lock(&self.inbound);
        if inbound.status == HubStatus::AwaitingChecksum {
            self.apply_status(&mut inbound, HubStatus::Idle);
        }
    }

    /// Checksum reply mailbox.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Store a failure of the inbound pipeline for the outbound side.
    ///
    /// The first unread failure is kept; later ones are only logged.
    pub fn record_fault(&self, error: LinkError) {
        tracing::error!("Inbound error: {}", error);
        self.events.emit(LinkEvent::Fault(error.to_string()));
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    /// Take the stored inbound failure, if any.
    pub fn take_fault(&self) -> Option<LinkError> {
        lock(&self.fault).take()
    }

    /// Check if a log capture is in progress.
    pub fn is_logging(&self) -> bool {
        lock(&self.inbound).processor.is_logging()
    }

    /// Check if the connection was closed by either side.
    pub fn is_closed(&self) -> bool {
        lock(&self.inbound).closed
    }

    /// Move to the disconnected state.
    ///
    /// Status becomes `Unknown`, the partial line and any unread checksum are
    /// dropped, and an open log is flushed and closed. Emits
    /// `LinkEvent::Disconnected` the first time only; returns `false` if the
    /// dispatcher was already closed.
    pub fn close(&self) -> bool {
        {
            let mut inbound = lock(&self.inbound);
            if inbound.closed {
                return false;
            }
            inbound.closed = true;
            self.apply_status(&mut inbound, HubStatus::Unknown);
            self.mailbox.clear();
            inbound.lines.clear();
            if let Err(e) = inbound.processor.abandon_log() {
                tracing::warn!("Failed to flush log on disconnect: {}", e);
            }
        }

        tracing::info!("Disconnected!");
        self.events.emit(LinkEvent::Disconnected);
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputSink;
    use crate::testing::{MemoryLogStore, MemoryOutput};

    fn dispatcher() -> (Dispatcher, MemoryOutput, MemoryLogStore) {
        let (dispatcher, output, logs, _) = dispatcher_with_events();
        (dispatcher, output, logs)
    }

    fn dispatcher_with_events() -> (
        Dispatcher,
        MemoryOutput,
        MemoryLogStore,
        tokio::sync::mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let output = MemoryOutput::new();
        let logs = MemoryLogStore::new();
        let (events, rx) = EventSink::channel();
        let processor = LineProcessor::new(
            Box::new(output.clone()),
            Box::new(logs.clone()),
            events.clone(),
        );
        (Dispatcher::new(processor, events), output, logs, rx)
    }

    fn status_changes(rx: &mut tokio::sync::mpsc::UnboundedReceiver<LinkEvent>) -> Vec<HubStatus> {
        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LinkEvent::StatusChanged { to, .. } = event {
                changes.push(to);
            }
        }
        changes
    }

    #[test]
    fn test_lines_independent_of_boundaries() {
        let (d, output, _) = dispatcher();

        d.dispatch(b"ab").unwrap();
        assert!(output.lines().is_empty());
        d.dispatch(b"c\r\ndef\r\n").unwrap();

        assert_eq!(output.lines(), vec!["abc", "def"]);
    }

    #[test]
    fn test_status_tokens_update_status() {
        let (d, output, _) = dispatcher();
        assert_eq!(d.status(), HubStatus::Unknown);

        d.dispatch(b">>>> IDLE\r\n").unwrap();
        assert_eq!(d.status(), HubStatus::Idle);

        d.dispatch(b">>>> RUNNING\r\nhello\r\n>>>> ERR").unwrap();
        assert_eq!(d.status(), HubStatus::Running);

        d.dispatch(b"OR\r\n").unwrap();
        assert_eq!(d.status(), HubStatus::Error);

        assert_eq!(
            output.lines(),
            vec![">>>> IDLE", ">>>> RUNNING", "hello", ">>>> ERROR"]
        );
    }

    #[test]
    fn test_repeated_status_changes_once() {
        let (d, _, _, mut rx) = dispatcher_with_events();

        d.dispatch(b">>>> IDLE\r\n").unwrap();
        d.dispatch(b">>>> IDLE\r\n").unwrap();

        assert_eq!(status_changes(&mut rx), vec![HubStatus::Idle]);
    }

    #[test]
    fn test_checksum_phase_takes_last_byte() {
        let (d, output, _) = dispatcher();
        d.begin_handshake().unwrap();

        d.dispatch(b"noise\r\n\x42").unwrap();

        assert_eq!(d.mailbox().try_take(), Some(Some(0x42)));
        assert!(output.lines().is_empty());
    }

    #[test]
    fn test_checksum_phase_empty_fragment() {
        let (d, _, _) = dispatcher();
        d.begin_handshake().unwrap();

        d.dispatch(b"").unwrap();

        assert_eq!(d.mailbox().try_take(), Some(None));
    }

    #[test]
    fn test_checksum_bytes_do_not_reach_line_buffer() {
        let (d, output, _) = dispatcher();
        d.dispatch(b"par").unwrap();

        d.begin_handshake().unwrap();
        d.dispatch(b"\r\n").unwrap();
        d.finish_handshake();
        assert_eq!(d.status(), HubStatus::Idle);

        d.dispatch(b"tial\r\n").unwrap();
        assert_eq!(output.lines(), vec!["partial"]);
    }

    #[test]
    fn test_finish_handshake_respects_disconnect() {
        let (d, _, _) = dispatcher();
        d.begin_handshake().unwrap();
        d.close();

        d.finish_handshake();

        assert_eq!(d.status(), HubStatus::Unknown);
    }

    #[test]
    fn test_begin_handshake_clears_mailbox() {
        let (d, _, _) = dispatcher();
        d.mailbox().deposit(Some(0x01));

        d.begin_handshake().unwrap();

        assert_eq!(d.status(), HubStatus::AwaitingChecksum);
        assert_eq!(d.mailbox().try_take(), None);
    }

    #[test]
    fn test_begin_handshake_after_close_fails() {
        let (d, _, _) = dispatcher();
        d.close();

        assert!(matches!(d.begin_handshake(), Err(LinkError::Disconnected)));
        assert_eq!(d.status(), HubStatus::Unknown);
    }

    /// Output sink that blocks on one line until released.
    struct GatedOutput {
        gate: &'static str,
        entered: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl OutputSink for GatedOutput {
        fn write_line(&mut self, line: &str) -> Result<()> {
            if line == self.gate {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            Ok(())
        }
    }

    #[test]
    fn test_handshake_waits_for_fragment_in_progress() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let processor = LineProcessor::new(
            Box::new(GatedOutput {
                gate: "hello",
                entered: entered_tx,
                release: release_rx,
            }),
            Box::new(MemoryLogStore::new()),
            EventSink::disabled(),
        );
        let d = Dispatcher::new(processor, EventSink::disabled());

        std::thread::scope(|scope| {
            let inbound = scope.spawn(|| d.dispatch(b"hello\r\n>>>> IDLE\r\n"));
            entered_rx.recv().unwrap();

            // The IDLE token of the held fragment must not land after the
            // handshake has started.
            let outbound = scope.spawn(|| d.begin_handshake());
            std::thread::sleep(std::time::Duration::from_millis(50));
            release_tx.send(()).unwrap();

            inbound.join().unwrap().unwrap();
            outbound.join().unwrap().unwrap();
        });

        assert_eq!(d.status(), HubStatus::AwaitingChecksum);
        d.dispatch(&[0x42]).unwrap();
        assert_eq!(d.mailbox().try_take(), Some(Some(0x42)));
    }

    #[test]
    fn test_log_capture_through_dispatch() {
        let (d, output, logs) = dispatcher();

        d.dispatch(b"before\r\nPB_OF out.txt\r\n1\r\n2\r").unwrap();
        assert!(d.is_logging());
        d.dispatch(b"\nPB_EOF\r\nafter\r\n").unwrap();

        assert!(!d.is_logging());
        assert_eq!(logs.opened(), vec!["out.txt"]);
        assert_eq!(logs.writes("out.txt"), 2);
        assert_eq!(logs.closed(), vec!["out.txt"]);
        assert_eq!(output.lines(), vec!["before", "after"]);

        d.dispatch(b"PB_OF a.txt\r\n").unwrap();
        let err = d.dispatch(b"PB_OF b.txt\r\n").unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
    }

    #[test]
    fn test_failing_line_does_not_drop_others() {
        let (d, output, _) = dispatcher();

        let err = d.dispatch(b"one\r\n\xFF\r\nPB_EOF\r\ntwo\r\n").unwrap_err();

        assert!(matches!(err, LinkError::Decode(_)));
        assert_eq!(output.lines(), vec!["one", "two"]);
    }

    #[test]
    fn test_close_ends_log_and_clears_buffer() {
        let (d, output, logs) = dispatcher();
        d.dispatch(b">>>> RUNNING\r\nPB_OF run.log\r\nhalf a li").unwrap();

        assert!(d.close());

        assert!(d.is_closed());
        assert_eq!(d.status(), HubStatus::Unknown);
        assert!(!d.is_logging());
        assert_eq!(logs.closed(), vec!["run.log"]);

        d.dispatch(b"ne\r\n").unwrap();
        assert_eq!(output.lines(), vec![">>>> RUNNING", "ne"]);
    }

    #[test]
    fn test_close_reports_once() {
        let (d, _, _, mut rx) = dispatcher_with_events();
        d.dispatch(b">>>> IDLE\r\n").unwrap();

        assert!(d.close());
        assert!(!d.close());

        let mut disconnects = 0;
        while let Ok(event) = rx.try_recv() {
            if event == LinkEvent::Disconnected {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_fault_slot_keeps_first() {
        let (d, _, _, mut rx) = dispatcher_with_events();

        d.record_fault(LinkError::NoReply);
        d.record_fault(LinkError::Disconnected);

        assert!(matches!(d.take_fault(), Some(LinkError::NoReply)));
        assert!(d.take_fault().is_none());
        assert!(matches!(rx.try_recv(), Ok(LinkEvent::Fault(_))));
    }
}
