//! Hub connection builder and runtime loop.
//!
//! The [`HubConnectionBuilder`] configures sinks, events and timing, then
//! opens a [`HubConnection`]. The connection manages the lifecycle:
//! 1. Open the transport through a [`Connector`]
//! 2. Subscribe to notifications and spawn the inbound pump
//! 3. Upload programs with checksum-acknowledged messages
//! 4. Wait for the program to finish
//!
//! # Example
//!
//! ```ignore
//! use hublink::HubConnectionBuilder;
//! use hublink::locator::ScanLocator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut hub = HubConnectionBuilder::new()
//!         .scan_and_connect(&ScanLocator::new(scanner), &connector)
//!         .await?;
//!
//!     hub.download_and_run(&program).await?;
//!     hub.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod dispatcher;

pub use dispatcher::Dispatcher;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::error::{LinkError, Phase, Result};
use crate::events::{EventSink, LinkEvent};
use crate::locator::DeviceLocator;
use crate::processor::LineProcessor;
use crate::protocol::{checksum, length_prefix, message_chunks, write_chunks, HubStatus};
use crate::sink::{FileLogStore, LogStore, OutputSink, StdoutSink};
use crate::transport::{Connector, Transport, TransportEvent};

/// Builder for configuring and opening a hub connection.
pub struct HubConnectionBuilder {
    config: LinkConfig,
    output: Box<dyn OutputSink>,
    logs: Box<dyn LogStore>,
    events: EventSink,
}

impl HubConnectionBuilder {
    /// Builder with default timing, stdout output and logs in the current
    /// directory.
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
            output: Box::new(StdoutSink),
            logs: Box::new(FileLogStore::current_dir()),
            events: EventSink::disabled(),
        }
    }

    /// Set the timing and sizing configuration.
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Set where plain program output goes.
    pub fn output(mut self, output: impl OutputSink + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Set where captured logs are stored.
    pub fn log_store(mut self, logs: impl LogStore + 'static) -> Self {
        self.logs = Box::new(logs);
        self
    }

    /// Set the structured event sink.
    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Connect to the hub at `address`.
    ///
    /// This will:
    /// 1. Validate the configuration
    /// 2. Open the transport
    /// 3. Subscribe to notifications
    /// 4. Start the inbound pump
    ///
    /// Status stays `Unknown` until the hub prints its first status line.
    pub async fn connect<C: Connector>(
        self,
        connector: &C,
        address: &str,
    ) -> Result<HubConnection<C::Transport>> {
        self.config.validate()?;

        let transport = connector.connect(address).await?;
        let inbound = match transport.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(close) = transport.disconnect().await {
                    tracing::warn!("Failed to close transport after subscribe error: {}", close);
                }
                return Err(e);
            }
        };

        tracing::info!("Connected to {}", address);
        Ok(HubConnection::start(
            transport,
            inbound,
            self.config,
            self.output,
            self.logs,
            self.events,
        ))
    }

    /// Scan for the configured device name, then connect to it.
    ///
    /// Failures are tagged with [`Phase::Scan`] or [`Phase::Connect`].
    pub async fn scan_and_connect<L, C>(
        self,
        locator: &L,
        connector: &C,
    ) -> Result<HubConnection<C::Transport>>
    where
        L: DeviceLocator,
        C: Connector,
    {
        let address = locator
            .locate(&self.config.device_name, self.config.scan_timeout)
            .await
            .map_err(|e| e.in_phase(Phase::Scan))?;

        self.connect(connector, &address)
            .await
            .map_err(|e| e.in_phase(Phase::Connect))
    }
}

impl Default for HubConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An open connection to a hub.
///
/// Outbound operations take `&mut self`, so at most one upload runs at a
/// time. Inbound traffic is handled by a background task for the lifetime
/// of the connection.
pub struct HubConnection<T: Transport> {
    transport: T,
    dispatcher: Arc<Dispatcher>,
    config: LinkConfig,
    events: EventSink,
    pump: Option<JoinHandle<()>>,
}

impl<T: Transport> HubConnection<T> {
    fn start(
        transport: T,
        inbound: mpsc::Receiver<TransportEvent>,
        config: LinkConfig,
        output: Box<dyn OutputSink>,
        logs: Box<dyn LogStore>,
        events: EventSink,
    ) -> Self {
        let processor = LineProcessor::new(output, logs, events.clone());
        let dispatcher = Arc::new(Dispatcher::new(processor, events.clone()));

        let pump = tokio::spawn(Self::pump(inbound, dispatcher.clone()));

        Self {
            transport,
            dispatcher,
            config,
            events,
            pump: Some(pump),
        }
    }

    /// Inbound pump - feeds every notification to the dispatcher in order.
    ///
    /// A closed stream is treated like a remote disconnect.
    async fn pump(mut inbound: mpsc::Receiver<TransportEvent>, dispatcher: Arc<Dispatcher>) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Notification(data) => {
                    if let Err(e) = dispatcher.dispatch(&data) {
                        dispatcher.record_fault(e);
                    }
                }
                TransportEvent::Disconnected => break,
            }
        }
        dispatcher.close();
    }

    /// Current hub status.
    pub fn status(&self) -> HubStatus {
        self.dispatcher.status()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<HubStatus> {
        self.dispatcher.subscribe_status()
    }

    /// Take the last inbound failure (decode error or protocol violation).
    pub fn take_fault(&self) -> Option<LinkError> {
        self.dispatcher.take_fault()
    }

    /// Check if the connection is still open on both ends.
    pub fn is_connected(&self) -> bool {
        self.pump.is_some() && !self.dispatcher.is_closed()
    }

    /// Get the active configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Close the connection.
    ///
    /// Stops notifications, closes the transport and resets status to
    /// `Unknown`. Emits `LinkEvent::Disconnected` unless the hub already
    /// dropped the connection. Calling it again does nothing.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        pump.abort();

        let unsubscribed = self.transport.unsubscribe().await;
        let closed = self.transport.disconnect().await;
        self.dispatcher.close();

        unsubscribed?;
        closed
    }

    /// Send one checksum-protected message.
    ///
    /// The payload is written in paced characteristic writes, then the hub
    /// must echo the XOR checksum within the handshake window. Nothing is
    /// retried.
    ///
    /// # Errors
    ///
    /// - `ValueTooLarge` if the payload is empty or longer than one message
    ///   (nothing is written)
    /// - `Disconnected` if either side closed the connection (nothing is
    ///   written)
    /// - `ChecksumTimeout` if no reply arrives in time
    /// - `NoReply` if the hub answers with an empty notification
    /// - `ChecksumMismatch` if the reply differs from the local checksum
    pub async fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.message_chunk_size;
        if payload.is_empty() || payload.len() > max {
            return Err(LinkError::ValueTooLarge {
                len: payload.len(),
                max,
            });
        }
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }

        let expected = checksum(payload);
        self.dispatcher.begin_handshake()?;
        let mailbox = self.dispatcher.mailbox();

        if let Err(e) = self.write_paced(payload).await {
            self.dispatcher.finish_handshake();
            return Err(e);
        }

        let reply = mailbox
            .take_within(self.config.checksum_timeout, self.config.checksum_poll)
            .await;
        self.dispatcher.finish_handshake();

        let Some(received) = reply else {
            return Err(LinkError::ChecksumTimeout(self.config.checksum_timeout));
        };
        self.events.emit(LinkEvent::ChecksumReply { expected, received });

        match received {
            None => Err(LinkError::NoReply),
            Some(received) if received != expected => {
                Err(LinkError::ChecksumMismatch { expected, received })
            }
            Some(_) => Ok(()),
        }
    }

    async fn write_paced(&self, payload: &[u8]) -> Result<()> {
        let size = self
            .config
            .write_chunk_size
            .min(self.transport.max_write_size());

        for chunk in write_chunks(payload, size) {
            tokio::time::sleep(self.config.write_pacing).await;
            tracing::debug!("TX: {:02x?}", chunk);
            self.transport.write(chunk).await?;
        }
        Ok(())
    }

    /// Upload a program and wait until it stops running.
    pub async fn download_and_run(&mut self, program: &[u8]) -> Result<()> {
        self.download_and_run_with_progress(program, |_, _| {}).await
    }

    /// Upload a program, reporting `(sent, total)` messages after each chunk,
    /// and wait until it stops running.
    ///
    /// Sends the 4-byte length message, then the program in messages of
    /// `message_chunk_size` bytes, strictly one at a time. Any failure aborts
    /// the upload and is tagged with its [`Phase`]. An inbound failure
    /// recorded before the upload started is discarded.
    pub async fn download_and_run_with_progress<F>(
        &mut self,
        program: &[u8],
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if let Some(stale) = self.dispatcher.take_fault() {
            tracing::debug!("Discarding earlier inbound error: {}", stale);
        }

        let prefix = length_prefix(program.len()).map_err(|e| e.in_phase(Phase::Length))?;
        self.send_message(&prefix)
            .await
            .map_err(|e| e.in_phase(Phase::Length))?;

        let chunks = message_chunks(program, self.config.message_chunk_size);
        let total = chunks.len();
        for (index, chunk) in chunks.enumerate() {
            self.send_message(chunk)
                .await
                .map_err(|e| e.in_phase(Phase::Chunk(index)))?;

            let sent = index + 1;
            progress(sent, total);
            self.events.emit(LinkEvent::Progress { sent, total });
            tracing::info!("Progress: {}%", sent * 100 / total);
        }

        self.wait_until_not_running()
            .await
            .map_err(|e| e.in_phase(Phase::RunWait))
    }

    /// Wait until the hub leaves the running state.
    ///
    /// Waits the grace period, then checks status after every poll interval
    /// or status change, whichever comes first. Without any status change the
    /// first check happens at grace plus one poll interval. Wrap it in
    /// `tokio::time::timeout` to bound it. Returns the inbound failure if one
    /// was recorded.
    pub async fn wait_until_not_running(&self) -> Result<()> {
        let mut status = self.dispatcher.subscribe_status();
        tokio::time::sleep(self.config.run_grace).await;
        status.borrow_and_update();

        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(LinkError::Disconnected);
                    }
                }
                _ = tokio::time::sleep(self.config.run_poll) => {}
            }

            if let Some(fault) = self.dispatcher.take_fault() {
                return Err(fault);
            }
            if !status.borrow_and_update().is_running() {
                return Ok(());
            }
        }
    }
}

impl<T: Transport> Drop for HubConnection<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
