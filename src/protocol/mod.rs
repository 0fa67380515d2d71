//! Protocol module - wire format, line framing, and hub status.
//!
//! This module implements the byte-level contract with the hub:
//! - XOR checksum, length prefix and chunking of outbound messages
//! - Line buffer reassembling `CR LF` terminated lines from fragments
//! - Hub status tokens and the status enum

mod line_buffer;
mod status;
mod wire_format;

pub use line_buffer::LineBuffer;
pub use status::HubStatus;
pub use wire_format::{
    checksum, length_prefix, markers, message_chunks, write_chunks, LINE_TERMINATOR,
    LENGTH_PREFIX_SIZE, STATUS_ERROR, STATUS_IDLE, STATUS_RUNNING,
};
