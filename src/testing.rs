//! Mock implementations for testing.
//!
//! Provides deterministic in-memory stand-ins for every external capability
//! of the link: transport, connector, scanner, output and log sinks. All
//! timing goes through `tokio::time`, so tests can run on a paused clock.
//!
//! # Example
//!
//! ```
//! use hublink::testing::{responders, MockTransport};
//!
//! // A transport that acknowledges one 3-byte message.
//! let transport = MockTransport::with_responder(responders::echo_checksum([3]));
//! assert!(transport.writes().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::locator::{DiscoveredDevice, Scanner};
use crate::protocol::{checksum, LENGTH_PREFIX_SIZE};
use crate::sink::{LogSink, LogStore, OutputSink};
use crate::transport::{nus, Connector, Transport, TransportEvent, INBOUND_CHANNEL_CAPACITY};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// An inbound event scheduled by a responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Delay after the previous delivery of the same batch.
    pub delay: Duration,
    /// What to deliver.
    pub event: TransportEvent,
}

impl Delivery {
    /// Deliver a notification right away.
    pub fn now(data: impl AsRef<[u8]>) -> Self {
        Self::after(Duration::ZERO, data)
    }

    /// Deliver a notification after `delay`.
    pub fn after(delay: Duration, data: impl AsRef<[u8]>) -> Self {
        Self {
            delay,
            event: TransportEvent::Notification(Bytes::copy_from_slice(data.as_ref())),
        }
    }

    /// Drop the connection after `delay`.
    pub fn disconnect_after(delay: Duration) -> Self {
        Self {
            delay,
            event: TransportEvent::Disconnected,
        }
    }
}

/// Computes the hub's reaction to one characteristic write.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Delivery> + Send>;

/// Ready-made responders.
pub mod responders {
    use super::*;

    /// Acknowledge messages of the given sizes, in order, with their checksum.
    ///
    /// Bytes are accumulated across writes; once the next expected size is
    /// reached the XOR of the message is sent back.
    pub fn echo_checksum(sizes: impl IntoIterator<Item = usize>) -> Responder {
        let mut sizes: VecDeque<usize> = sizes.into_iter().collect();
        let mut pending = Vec::new();

        Box::new(move |data: &[u8]| {
            pending.extend_from_slice(data);
            match sizes.front() {
                Some(&size) if pending.len() >= size => {
                    sizes.pop_front();
                    let reply = checksum(&pending[..size]);
                    pending.drain(..size);
                    vec![Delivery::now([reply])]
                }
                _ => Vec::new(),
            }
        })
    }

    /// Emulate the hub's program loader.
    ///
    /// Expects a 4-byte little-endian length message followed by the program
    /// in messages of at most `message_size` bytes, acknowledging each one.
    /// After the last message the `after_run` deliveries are played. Give the
    /// first one a non-zero delay: until the handshake resolves, every
    /// notification is read as a checksum reply.
    pub fn program_loader(message_size: usize, after_run: Vec<Delivery>) -> Responder {
        let mut pending: Vec<u8> = Vec::new();
        let mut remaining: Option<usize> = None;
        let mut after_run = Some(after_run);

        Box::new(move |data: &[u8]| {
            pending.extend_from_slice(data);

            let expected = match remaining {
                None => LENGTH_PREFIX_SIZE,
                Some(left) => left.min(message_size),
            };
            if expected == 0 || pending.len() < expected {
                return Vec::new();
            }

            let message: Vec<u8> = pending.drain(..expected).collect();
            let mut out = vec![Delivery::now([checksum(&message)])];

            remaining = match remaining {
                None => {
                    let mut len = [0u8; LENGTH_PREFIX_SIZE];
                    len.copy_from_slice(&message);
                    Some(u32::from_le_bytes(len) as usize)
                }
                Some(left) => Some(left - expected),
            };

            if remaining == Some(0) {
                out.extend(after_run.take().unwrap_or_default());
            }
            out
        })
    }
}

struct MockInner {
    writes: Mutex<Vec<(Instant, Vec<u8>)>>,
    tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    backlog: Mutex<Vec<TransportEvent>>,
    responder: Mutex<Option<Responder>>,
    subscribed: AtomicBool,
    disconnected: AtomicBool,
}

/// In-memory transport.
///
/// Records every write, replays responder deliveries on the inbound stream,
/// and lets tests inject notifications or a remote disconnect. Clones share
/// the same session.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Transport that never answers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                writes: Mutex::new(Vec::new()),
                tx: Mutex::new(None),
                backlog: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                subscribed: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Transport answering writes with `responder`.
    pub fn with_responder(responder: Responder) -> Self {
        let transport = Self::new();
        *lock(&transport.inner.responder) = Some(responder);
        transport
    }

    /// Deliver a notification as if the hub had sent it.
    ///
    /// Notifications injected before `subscribe` are queued.
    pub fn inject(&self, data: impl AsRef<[u8]>) {
        self.deliver(TransportEvent::Notification(Bytes::copy_from_slice(
            data.as_ref(),
        )));
    }

    /// Simulate the hub dropping the connection.
    pub fn remote_disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::Release);
        self.deliver(TransportEvent::Disconnected);
    }

    /// All writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes)
            .iter()
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Virtual time of every write, in order.
    pub fn write_times(&self) -> Vec<Instant> {
        lock(&self.inner.writes).iter().map(|(at, _)| *at).collect()
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.inner.writes)
            .iter()
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    /// Check if notifications are enabled.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::Acquire)
    }

    /// Check if the session was closed by either side.
    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::Acquire)
    }

    fn deliver(&self, event: TransportEvent) {
        let tx = lock(&self.inner.tx).clone();
        match tx {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    tracing::warn!("Mock inbound channel full or closed, event dropped");
                }
            }
            None => lock(&self.inner.backlog).push(event),
        }
    }

    fn play(&self, deliveries: Vec<Delivery>) {
        let mut deliveries = deliveries.into_iter().peekable();

        while let Some(delivery) = deliveries.next_if(|d| d.delay.is_zero()) {
            self.deliver(delivery.event);
        }

        let rest: Vec<Delivery> = deliveries.collect();
        if rest.is_empty() {
            return;
        }

        let transport = self.clone();
        tokio::spawn(async move {
            for delivery in rest {
                tokio::time::sleep(delivery.delay).await;
                if delivery.event == TransportEvent::Disconnected {
                    transport.remote_disconnect();
                } else {
                    transport.deliver(delivery.event);
                }
            }
        });
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_disconnected() {
            return Err(LinkError::Disconnected);
        }
        if data.len() > nus::MAX_WRITE_SIZE {
            return Err(LinkError::Connection(format!(
                "write of {} bytes exceeds characteristic limit",
                data.len()
            )));
        }

        lock(&self.inner.writes).push((Instant::now(), data.to_vec()));

        let deliveries = match lock(&self.inner.responder).as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        self.play(deliveries);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        for event in lock(&self.inner.backlog).drain(..) {
            let _ = tx.try_send(event);
        }
        *lock(&self.inner.tx) = Some(tx);
        self.inner.subscribed.store(true, Ordering::Release);
        Ok(rx)
    }

    async fn unsubscribe(&self) -> Result<()> {
        lock(&self.inner.tx).take();
        self.inner.subscribed.store(false, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnected.store(true, Ordering::Release);
        Ok(())
    }
}

/// Connector handing out a prepared [`MockTransport`].
#[derive(Clone)]
pub struct MockConnector {
    transport: MockTransport,
    addresses: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockConnector {
    /// Connector returning (a clone of) `transport` for every address.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            addresses: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// Connector whose every attempt fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(MockTransport::new())
        }
    }

    /// Addresses connected to, in order.
    pub fn addresses(&self) -> Vec<String> {
        lock(&self.addresses).clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, address: &str) -> Result<MockTransport> {
        lock(&self.addresses).push(address.to_string());
        if self.fail {
            return Err(LinkError::Connection(format!(
                "could not connect to {}",
                address
            )));
        }
        Ok(self.transport.clone())
    }
}

/// Scanner revealing a fixed set of devices over time.
#[derive(Clone, Default)]
pub struct StaticScanner {
    devices: Vec<(Duration, DiscoveredDevice)>,
    started: Arc<Mutex<Option<Instant>>>,
    stopped: Arc<AtomicBool>,
}

impl StaticScanner {
    /// Scanner that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reveal `device` once the scan has run for `after`.
    pub fn device(mut self, after: Duration, device: DiscoveredDevice) -> Self {
        self.devices.push((after, device));
        self
    }

    /// Check if the scan was stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Scanner for StaticScanner {
    async fn start_scan(&self) -> Result<()> {
        *lock(&self.started) = Some(Instant::now());
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>> {
        let started = (*lock(&self.started)).ok_or_else(|| {
            LinkError::Connection("scan not started".to_string())
        })?;
        let elapsed = started.elapsed();
        Ok(self
            .devices
            .iter()
            .filter(|(after, _)| *after <= elapsed)
            .map(|(_, device)| device.clone())
            .collect())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

/// Output sink collecting lines in memory. Clones share the same lines.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryOutput {
    /// Empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

impl OutputSink for MemoryOutput {
    fn write_line(&mut self, line: &str) -> Result<()> {
        lock(&self.lines).push(line.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct LogRecords {
    opened: Vec<String>,
    closed: Vec<String>,
    contents: HashMap<String, Vec<u8>>,
    writes: HashMap<String, usize>,
}

/// Log store keeping every log in memory. Clones share the same logs.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    records: Arc<Mutex<LogRecords>>,
}

impl MemoryLogStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of logs opened, in order.
    pub fn opened(&self) -> Vec<String> {
        lock(&self.records).opened.clone()
    }

    /// Names of logs closed (sink dropped), in order.
    pub fn closed(&self) -> Vec<String> {
        lock(&self.records).closed.clone()
    }

    /// Number of write calls the log `name` received.
    pub fn writes(&self, name: &str) -> usize {
        lock(&self.records).writes.get(name).copied().unwrap_or(0)
    }

    /// Content of the log `name` as text.
    pub fn contents(&self, name: &str) -> Option<String> {
        lock(&self.records)
            .contents
            .get(name)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl LogStore for MemoryLogStore {
    fn open(&mut self, name: &str) -> Result<LogSink> {
        {
            let mut records = lock(&self.records);
            records.opened.push(name.to_string());
            records.contents.insert(name.to_string(), Vec::new());
            records.writes.insert(name.to_string(), 0);
        }
        Ok(Box::new(MemoryLogSink {
            name: name.to_string(),
            records: self.records.clone(),
        }))
    }
}

struct MemoryLogSink {
    name: String,
    records: Arc<Mutex<LogRecords>>,
}

impl Write for MemoryLogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut records = lock(&self.records);
        records
            .contents
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        *records.writes.entry(self.name.clone()).or_default() += 1;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryLogSink {
    fn drop(&mut self) {
        lock(&self.records).closed.push(self.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_checksum_across_writes() {
        let mut responder = responders::echo_checksum([3, 1]);

        assert!(responder(&[0x01, 0x02]).is_empty());
        assert_eq!(responder(&[0x04]), vec![Delivery::now([0x07])]);
        assert_eq!(responder(&[0xAA]), vec![Delivery::now([0xAA])]);
        assert!(responder(&[0x01]).is_empty());
    }

    #[test]
    fn test_program_loader_sequence() {
        let done = vec![Delivery::now(b">>>> RUNNING\r\n")];
        let mut responder = responders::program_loader(100, done);

        let replies = responder(&250u32.to_le_bytes());
        assert_eq!(replies, vec![Delivery::now([checksum(&250u32.to_le_bytes())])]);

        let program = vec![0x5Au8; 250];
        let mut replies = Vec::new();
        for chunk in program.chunks(20) {
            replies.extend(responder(chunk));
        }

        // 100 + 100 + 50 bytes acknowledged, then the run script.
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], Delivery::now([0x00]));
        assert_eq!(replies[2], Delivery::now([0x00]));
        assert_eq!(replies[3], Delivery::now(b">>>> RUNNING\r\n"));
    }

    #[tokio::test]
    async fn test_mock_transport_records_and_replies() {
        let transport = MockTransport::with_responder(responders::echo_checksum([2]));
        let mut rx = transport.subscribe().await.unwrap();

        transport.write(&[0x0F, 0xF0]).await.unwrap();

        assert_eq!(transport.writes(), vec![vec![0x0F, 0xF0]]);
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Notification(Bytes::from_static(&[0xFF]))
        );
    }

    #[tokio::test]
    async fn test_mock_transport_rejects_oversized_write() {
        let transport = MockTransport::new();
        let result = transport.write(&[0u8; 21]).await;
        assert!(matches!(result, Err(LinkError::Connection(_))));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_inject_before_subscribe_is_queued() {
        let transport = MockTransport::new();
        transport.inject(b"early\r\n");

        let mut rx = transport.subscribe().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Notification(Bytes::from_static(b"early\r\n"))
        );
    }

    #[tokio::test]
    async fn test_failing_connector() {
        let connector = MockConnector::failing();
        let result = connector.connect("hub").await;
        assert!(matches!(result, Err(LinkError::Connection(_))));
        assert_eq!(connector.addresses(), vec!["hub"]);
    }
}
