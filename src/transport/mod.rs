//! Transport module - BLE serial session abstraction.
//!
//! The link engine talks to the hub through two capabilities:
//! - [`Connector`]: opens a [`Transport`] to a device address
//! - [`Transport`]: bounded-size writes to the NUS RX characteristic and a
//!   stream of inbound [`TransportEvent`]s from the NUS TX characteristic
//!
//! Backends:
//! - `btleplug` feature: desktop BLE through btleplug ([`ble`])
//! - [`crate::testing`]: in-memory mock for tests

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod nus;

#[cfg(feature = "btleplug")]
pub mod ble;

/// Capacity of the inbound event channel handed out by `subscribe`.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Something delivered by the transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One notification from the TX characteristic. Arbitrary size, not
    /// aligned to any message or line boundary.
    Notification(Bytes),
    /// The remote dropped the connection.
    Disconnected,
}

/// A connected BLE serial session.
pub trait Transport: Send + Sync + 'static {
    /// Largest payload a single `write` accepts.
    fn max_write_size(&self) -> usize {
        nus::MAX_WRITE_SIZE
    }

    /// Write one chunk (at most `max_write_size` bytes) to the RX characteristic.
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Start notifications and return the inbound event stream.
    fn subscribe(&self) -> impl Future<Output = Result<mpsc::Receiver<TransportEvent>>> + Send;

    /// Stop notifications.
    fn unsubscribe(&self) -> impl Future<Output = Result<()>> + Send;

    /// Close the session.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports by device address.
pub trait Connector: Send + Sync {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Connect to the device at `address`.
    fn connect(&self, address: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}
