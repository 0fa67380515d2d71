//! Line buffer for accumulating partial notifications.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. The hub sends text
//! in notifications of arbitrary size that are not aligned to line
//! boundaries; this buffer reassembles them into `CR LF` terminated lines.
//!
//! # Example
//!
//! ```
//! use hublink::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.push(b"ab").is_empty());
//! let lines = buffer.push(b"c\r\ndef\r\n");
//!
//! assert_eq!(lines.len(), 2);
//! assert_eq!(&lines[0][..], b"abc");
//! assert_eq!(&lines[1][..], b"def");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::LINE_TERMINATOR;

/// Buffer for accumulating incoming bytes and extracting complete lines.
///
/// Extracted bytes are split off the front of the buffer, so a line is
/// produced exactly once. A search offset remembers how far the buffer has
/// already been scanned so long partial lines are not rescanned on each push.
pub struct LineBuffer {
    /// Accumulated bytes from notifications.
    buffer: BytesMut,
    /// Bytes at the front of `buffer` known not to start a terminator.
    scanned: usize,
}

impl LineBuffer {
    /// Create a new line buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            scanned: 0,
        }
    }

    /// Push data into the buffer and extract all complete lines.
    ///
    /// Returned lines do not include the terminator. A trailing partial line
    /// is kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();

        while let Some(line) = self.try_extract_one() {
            lines.push(line);
        }

        lines
    }

    /// Try to extract a single line from the buffer.
    fn try_extract_one(&mut self) -> Option<Bytes> {
        let found = self.buffer[self.scanned..]
            .windows(LINE_TERMINATOR.len())
            .position(|w| w == LINE_TERMINATOR);

        match found {
            Some(offset) => {
                let end = self.scanned + offset;
                let line = self.buffer.split_to(end).freeze();
                let _ = self.buffer.split_to(LINE_TERMINATOR.len());
                self.scanned = 0;
                Some(line)
            }
            None => {
                // A CR at the very end may still be completed by the next push.
                self.scanned = self.buffer.len().saturating_sub(LINE_TERMINATOR.len() - 1);
                None
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
