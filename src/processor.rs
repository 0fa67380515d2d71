//! Line processor.
//!
//! Classifies every decoded line the hub prints:
//!
//! | Line contains            | Action                                  |
//! |--------------------------|-----------------------------------------|
//! | `PB_OF` + delim + name   | open log `name` (error if one is open)  |
//! | `PB_EOF`                 | close the open log (error if none)      |
//! | anything, log open       | append line + `\n` to the log           |
//! | anything else            | forward to the output sink              |
//!
//! Status tokens are applied by the link before the line gets here and then
//! handled like any other line.

use std::io::Write;

use crate::error::{LinkError, Result};
use crate::events::{EventSink, LinkEvent};
use crate::protocol::markers::{LOG_CLOSE, LOG_OPEN};
use crate::sink::{LogSink, LogStore, OutputSink};

/// What the processor did with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Forwarded to the output sink.
    Output,
    /// Opened a log.
    LogOpen,
    /// Closed the open log.
    LogClose,
    /// Appended to the open log.
    LogData,
}

struct OpenLog {
    name: String,
    sink: LogSink,
}

/// Routes decoded lines to the output sink or the open log.
pub struct LineProcessor {
    output: Box<dyn OutputSink>,
    logs: Box<dyn LogStore>,
    open_log: Option<OpenLog>,
    events: EventSink,
}

impl LineProcessor {
    /// Create a processor with no log open.
    pub fn new(output: Box<dyn OutputSink>, logs: Box<dyn LogStore>, events: EventSink) -> Self {
        Self {
            output,
            logs,
            open_log: None,
            events,
        }
    }

    /// Process one line (terminator already stripped).
    ///
    /// # Errors
    ///
    /// - `Decode` if the line is not valid UTF-8
    /// - `ProtocolViolation` on an unbalanced or malformed log marker
    /// - `Io` if the output or log sink fails
    pub fn process(&mut self, line: &[u8]) -> Result<LineKind> {
        let text = String::from_utf8(line.to_vec())?;

        if let Some(at) = text.find(LOG_OPEN) {
            let name = log_file_name(&text[at + LOG_OPEN.len()..])?;
            self.open(name)?;
            return Ok(LineKind::LogOpen);
        }

        if text.contains(LOG_CLOSE) {
            self.close()?;
            return Ok(LineKind::LogClose);
        }

        if let Some(log) = self.open_log.as_mut() {
            tracing::debug!("{}", text);
            let mut record = text.into_bytes();
            record.push(b'\n');
            log.sink.write_all(&record)?;
            return Ok(LineKind::LogData);
        }

        self.output.write_line(&text)?;
        Ok(LineKind::Output)
    }

    /// Check if a log capture is in progress.
    pub fn is_logging(&self) -> bool {
        self.open_log.is_some()
    }

    /// Name of the open log, if any.
    pub fn open_log_name(&self) -> Option<&str> {
        self.open_log.as_ref().map(|log| log.name.as_str())
    }

    /// Flush and drop the open log without a close marker.
    ///
    /// Used when the connection ends; does nothing if no log is open.
    pub fn abandon_log(&mut self) -> Result<()> {
        if let Some(mut log) = self.open_log.take() {
            tracing::warn!("Connection ended while saving log {}", log.name);
            log.sink.flush()?;
        }
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<()> {
        if let Some(log) = &self.open_log {
            return Err(LinkError::ProtocolViolation(format!(
                "log file {} is already open",
                log.name
            )));
        }

        let sink = self.logs.open(name)?;
        tracing::info!("Saving log to {}.", name);
        self.open_log = Some(OpenLog {
            name: name.to_string(),
            sink,
        });
        self.events.emit(LinkEvent::LogOpened {
            name: name.to_string(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut log = self.open_log.take().ok_or_else(|| {
            LinkError::ProtocolViolation("no log file is currently open".to_string())
        })?;

        log.sink.flush()?;
        drop(log.sink);
        tracing::info!("Done saving log.");
        self.events.emit(LinkEvent::LogClosed { name: log.name });
        Ok(())
    }
}

/// Extract the filename following the open marker.
///
/// Exactly one delimiter character separates the marker from the name.
/// The name must be a bare file name: no path separators, not `.` or `..`.
fn log_file_name(after_marker: &str) -> Result<&str> {
    let mut chars = after_marker.chars();
    chars.next();
    let name = chars.as_str().trim_end();

    if name.is_empty() {
        return Err(LinkError::ProtocolViolation(
            "log open marker without a file name".to_string(),
        ));
    }
    if name.contains(|c| c == '/' || c == '\\') || name == "." || name == ".." {
        return Err(LinkError::ProtocolViolation(format!(
            "log file name {:?} is not a plain file name",
            name
        )));
    }
    Ok(name)
}
