//! Device locator - resolve a hub name to a transport address.
//!
//! Scanning itself is a platform capability ([`Scanner`]). This module adds
//! the timed polling on top of it: start the scan, check the devices seen so
//! far every `interval`, return the address of the first device whose
//! advertised name contains the wanted name, give up after `timeout`.
//!
//! # Example
//!
//! ```ignore
//! use hublink::locator::{DeviceLocator, ScanLocator};
//!
//! let locator = ScanLocator::new(scanner);
//! let address = locator.locate("Pybricks Hub", Duration::from_secs(5)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_SCAN_INTERVAL;
use crate::error::{LinkError, Result};

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Address to pass to a [`Connector`](crate::transport::Connector).
    pub address: String,
}

impl DiscoveredDevice {
    /// Create a device record.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Check if the advertised name contains `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        self.name
            .as_deref()
            .map(|name| name.contains(pattern))
            .unwrap_or(false)
    }
}

/// Platform scanning capability.
pub trait Scanner: Send + Sync {
    /// Start scanning.
    fn start_scan(&self) -> impl Future<Output = Result<()>> + Send;

    /// Devices discovered since the scan started.
    fn discovered(&self) -> impl Future<Output = Result<Vec<DiscoveredDevice>>> + Send;

    /// Stop scanning.
    fn stop_scan(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Resolves a device name to an address.
pub trait DeviceLocator: Send + Sync {
    /// Find the first device whose name contains `name`.
    ///
    /// Fails with `NotFound` once `timeout` has elapsed.
    fn locate(&self, name: &str, timeout: Duration) -> impl Future<Output = Result<String>> + Send;
}

/// Poll `scanner` until a device matching `name` shows up.
///
/// The scan is stopped on every exit path.
pub async fn find_device<S: Scanner>(
    scanner: &S,
    name: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<String> {
    scanner.start_scan().await?;

    let result = poll_for_device(scanner, name, timeout, interval).await;

    if let Err(e) = scanner.stop_scan().await {
        tracing::warn!("Failed to stop scan: {}", e);
    }

    result
}

async fn poll_for_device<S: Scanner>(
    scanner: &S,
    name: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<String> {
    let deadline = Instant::now() + timeout;

    loop {
        let devices = scanner.discovered().await?;
        if let Some(device) = devices.into_iter().find(|d| d.matches(name)) {
            tracing::info!("Found {} at {}", name, device.address);
            return Ok(device.address);
        }

        if Instant::now() >= deadline {
            return Err(LinkError::NotFound {
                name: name.to_string(),
                timeout,
            });
        }

        tokio::time::sleep(interval).await;
    }
}

/// [`DeviceLocator`] backed by a [`Scanner`].
#[derive(Debug, Clone)]
pub struct ScanLocator<S> {
    scanner: S,
    interval: Duration,
}

impl<S: Scanner> ScanLocator<S> {
    /// Locator polling every 100 ms.
    pub fn new(scanner: S) -> Self {
        Self {
            scanner,
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Set the poll interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Get the underlying scanner.
    pub fn scanner(&self) -> &S {
        &self.scanner
    }
}

impl<S: Scanner> DeviceLocator for ScanLocator<S> {
    async fn locate(&self, name: &str, timeout: Duration) -> Result<String> {
        tracing::info!("Scanning for {}", name);
        find_device(&self.scanner, name, timeout, self.interval).await
    }
}
