//! Link timing and sizing configuration.
//!
//! Every constant of the hub wire contract lives here with a default that
//! matches the firmware. Values can be overridden with the fluent setters or
//! loaded from JSON, where durations are given in milliseconds:
//!
//! ```
//! use hublink::LinkConfig;
//!
//! let config = LinkConfig::from_json(r#"{ "write_pacing_ms": 20 }"#).unwrap();
//! assert_eq!(config.write_pacing.as_millis(), 20);
//! assert_eq!(config.message_chunk_size, 100);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{LinkError, Result};

/// Largest payload accepted by one characteristic write.
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 20;

/// Largest payload covered by one checksum handshake.
pub const DEFAULT_MESSAGE_CHUNK_SIZE: usize = 100;

/// Delay before every characteristic write.
pub const DEFAULT_WRITE_PACING: Duration = Duration::from_millis(50);

/// How long to wait for the checksum byte (50 polls of 10 ms).
pub const DEFAULT_CHECKSUM_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll cadence inside the checksum window.
pub const DEFAULT_CHECKSUM_POLL: Duration = Duration::from_millis(10);

/// Time the hub needs to enter the running state after the last chunk.
pub const DEFAULT_RUN_GRACE: Duration = Duration::from_millis(500);

/// Poll cadence while waiting for the program to finish.
pub const DEFAULT_RUN_POLL: Duration = Duration::from_millis(100);

/// Poll cadence while scanning.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Default scan timeout.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Advertised name of a hub running the stock firmware.
pub const DEFAULT_DEVICE_NAME: &str = "Pybricks Hub";

/// Configuration for a hub link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum bytes per characteristic write.
    pub write_chunk_size: usize,
    /// Maximum bytes per checksum-protected message.
    pub message_chunk_size: usize,
    /// Delay before each characteristic write.
    #[serde(rename = "write_pacing_ms", deserialize_with = "millis")]
    pub write_pacing: Duration,
    /// Checksum handshake window.
    #[serde(rename = "checksum_timeout_ms", deserialize_with = "millis")]
    pub checksum_timeout: Duration,
    /// Poll cadence inside the checksum window.
    #[serde(rename = "checksum_poll_ms", deserialize_with = "millis")]
    pub checksum_poll: Duration,
    /// Grace period before checking whether the program still runs.
    #[serde(rename = "run_grace_ms", deserialize_with = "millis")]
    pub run_grace: Duration,
    /// Poll cadence while waiting for the program to finish.
    #[serde(rename = "run_poll_ms", deserialize_with = "millis")]
    pub run_poll: Duration,
    /// Poll cadence while scanning.
    #[serde(rename = "scan_interval_ms", deserialize_with = "millis")]
    pub scan_interval: Duration,
    /// Scan timeout.
    #[serde(rename = "scan_timeout_ms", deserialize_with = "millis")]
    pub scan_timeout: Duration,
    /// Name (or name fragment) of the hub to scan for.
    pub device_name: String,
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            message_chunk_size: DEFAULT_MESSAGE_CHUNK_SIZE,
            write_pacing: DEFAULT_WRITE_PACING,
            checksum_timeout: DEFAULT_CHECKSUM_TIMEOUT,
            checksum_poll: DEFAULT_CHECKSUM_POLL,
            run_grace: DEFAULT_RUN_GRACE,
            run_poll: DEFAULT_RUN_POLL,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

impl LinkConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LinkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the sizes and cadences are usable.
    pub fn validate(&self) -> Result<()> {
        if self.write_chunk_size == 0 || self.message_chunk_size == 0 {
            return Err(LinkError::InvalidConfig(
                "chunk sizes must be non-zero".to_string(),
            ));
        }
        if self.write_chunk_size > self.message_chunk_size {
            return Err(LinkError::InvalidConfig(format!(
                "write chunk ({}) larger than message chunk ({})",
                self.write_chunk_size, self.message_chunk_size
            )));
        }
        if self.checksum_poll.is_zero() || self.run_poll.is_zero() || self.scan_interval.is_zero()
        {
            return Err(LinkError::InvalidConfig(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the characteristic write size.
    pub fn write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    /// Set the checksum-protected message size.
    pub fn message_chunk_size(mut self, size: usize) -> Self {
        self.message_chunk_size = size;
        self
    }

    /// Set the delay before each characteristic write.
    pub fn write_pacing(mut self, pacing: Duration) -> Self {
        self.write_pacing = pacing;
        self
    }

    /// Set the checksum handshake window.
    pub fn checksum_timeout(mut self, timeout: Duration) -> Self {
        self.checksum_timeout = timeout;
        self
    }

    /// Set the grace period before the run-wait starts checking.
    pub fn run_grace(mut self, grace: Duration) -> Self {
        self.run_grace = grace;
        self
    }

    /// Set the run-wait poll cadence.
    pub fn run_poll(mut self, poll: Duration) -> Self {
        self.run_poll = poll;
        self
    }

    /// Set the scan timeout.
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the device name to scan for.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_wire_contract() {
        let config = LinkConfig::default();
        assert_eq!(config.write_chunk_size, 20);
        assert_eq!(config.message_chunk_size, 100);
        assert_eq!(config.write_pacing, Duration::from_millis(50));
        assert_eq!(config.checksum_timeout, Duration::from_millis(500));
        assert_eq!(config.device_name, "Pybricks Hub");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_configuration() {
        let config = LinkConfig::default()
            .write_pacing(Duration::from_millis(5))
            .run_grace(Duration::from_secs(1))
            .device_name("Technic Hub");

        assert_eq!(config.write_pacing, Duration::from_millis(5));
        assert_eq!(config.run_grace, Duration::from_secs(1));
        assert_eq!(config.device_name, "Technic Hub");
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            LinkConfig::from_json(r#"{"checksum_timeout_ms": 250, "device_name": "City Hub"}"#)
                .unwrap();

        assert_eq!(config.checksum_timeout, Duration::from_millis(250));
        assert_eq!(config.device_name, "City Hub");
        assert_eq!(config.write_chunk_size, DEFAULT_WRITE_CHUNK_SIZE);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = LinkConfig::from_json("{ not json");
        assert!(matches!(result, Err(LinkError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_write_chunk() {
        let config = LinkConfig::default().write_chunk_size(200);
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }
}
