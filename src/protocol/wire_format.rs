//! Wire format of the hub link.
//!
//! Outbound, a program upload looks like:
//! ```text
//! ┌──────────────────┬────────────┬────────────┬─────┬────────────┐
//! │ Length (u32 LE)  │ Chunk 0    │ Chunk 1    │ ... │ Chunk N-1  │
//! │ 1 message        │ ≤100 bytes │ ≤100 bytes │     │ ≤100 bytes │
//! └──────────────────┴────────────┴────────────┴─────┴────────────┘
//! ```
//! Each message is acknowledged by the hub with one byte, the XOR of all
//! bytes of the message, and is written as ≤20-byte characteristic writes.
//!
//! Inbound, the hub prints `CR LF` terminated text lines. Some lines are
//! status tokens, some are log capture markers.

use crate::error::{LinkError, Result};

/// Line terminator used by the hub.
pub const LINE_TERMINATOR: &[u8; 2] = b"\r\n";

/// Status token printed when the hub is idle.
pub const STATUS_IDLE: &[u8] = b">>>> IDLE";

/// Status token printed when a program starts.
pub const STATUS_RUNNING: &[u8] = b">>>> RUNNING";

/// Status token printed when a program failed.
pub const STATUS_ERROR: &[u8] = b">>>> ERROR";

/// Size of the program length message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Log capture markers.
pub mod markers {
    /// Opens a log file; followed by one delimiter and the filename.
    pub const LOG_OPEN: &str = "PB_OF";
    /// Closes the open log file.
    pub const LOG_CLOSE: &str = "PB_EOF";
}

/// XOR-fold of all bytes, as echoed by the hub.
///
/// # Example
///
/// ```
/// use hublink::protocol::checksum;
///
/// assert_eq!(checksum(&[0x01, 0x02, 0x04]), 0x07);
/// assert_eq!(checksum(&[0xAA, 0xAA]), 0x00);
/// ```
#[inline]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode the program length message (4 bytes, little endian).
///
/// Fails with `ValueTooLarge` if `len` does not fit in a `u32`.
pub fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let value = u32::try_from(len).map_err(|_| LinkError::ValueTooLarge {
        len,
        max: u32::MAX as usize,
    })?;
    Ok(value.to_le_bytes())
}

/// Split a program into checksum-protected messages.
#[inline]
pub fn message_chunks(data: &[u8], size: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(size)
}

/// Split a message into characteristic writes.
#[inline]
pub fn write_chunks(data: &[u8], size: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty_is_zero() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_all_byte_values() {
        // XOR of 0..=255 cancels out pairwise.
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(checksum(&all), 0);
        assert_eq!(checksum(&all[..3]), 3);
    }

    #[test]
    fn test_length_prefix_little_endian() {
        assert_eq!(length_prefix(250).unwrap(), [0xFA, 0x00, 0x00, 0x00]);
        assert_eq!(
            length_prefix(0x0102_0304).unwrap(),
            [0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_message_chunks_sizes() {
        let program = vec![7u8; 250];
        let sizes: Vec<usize> = message_chunks(&program, 100).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_chunking_reassembles_exactly() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1234).collect();

        for size in [20, 100] {
            let rebuilt: Vec<u8> = write_chunks(&data, size).flatten().copied().collect();
            assert_eq!(rebuilt, data);
            assert!(write_chunks(&data, size).all(|c| c.len() <= size));
        }
    }

    #[test]
    fn test_status_tokens_exact_bytes() {
        assert_eq!(STATUS_IDLE, b">>>> IDLE");
        assert_eq!(STATUS_RUNNING, b">>>> RUNNING");
        assert_eq!(STATUS_ERROR, b">>>> ERROR");
    }
}
