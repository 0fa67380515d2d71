//! # hublink
//!
//! Host-side loader for Pybricks-style hubs over the BLE Nordic UART Service.
//!
//! This crate uploads a compiled program to a hub in checksum-acknowledged
//! messages and supervises it while it runs, splitting the hub's output into
//! status updates, captured log files and plain program output.
//!
//! ## Architecture
//!
//! - **Outbound** (NUS RX characteristic): 100-byte messages, each written in
//!   paced 20-byte chunks and confirmed by an XOR checksum echo
//! - **Inbound** (NUS TX characteristic): `CR LF` terminated text lines, or a
//!   single checksum byte while a message is being confirmed
//!
//! Scanning and GATT access are capabilities ([`locator::Scanner`],
//! [`transport::Connector`]); the `btleplug` feature provides a desktop
//! backend and [`testing`] provides in-memory mocks.
//!
//! ## Example
//!
//! ```ignore
//! use hublink::transport::ble::{default_adapter, BleConnector, BleScanner};
//! use hublink::locator::ScanLocator;
//! use hublink::HubConnectionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = default_adapter().await?;
//!     let mut hub = HubConnectionBuilder::new()
//!         .scan_and_connect(
//!             &ScanLocator::new(BleScanner::new(adapter.clone())),
//!             &BleConnector::new(adapter),
//!         )
//!         .await?;
//!
//!     hub.download_and_run(&std::fs::read("program.mpy")?).await?;
//!     hub.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod locator;
pub mod mailbox;
pub mod processor;
pub mod protocol;
pub mod sink;
pub mod testing;
pub mod transport;

pub use config::LinkConfig;
pub use error::{LinkError, Phase, Result};
pub use events::{EventSink, LinkEvent};
pub use link::{HubConnection, HubConnectionBuilder};
pub use protocol::HubStatus;
