//! Output and log sinks.
//!
//! Plain program output goes to an [`OutputSink`] (stdout by default). Lines
//! captured between log markers go to a [`LogSink`] opened by name from a
//! [`LogStore`] (files in a directory by default).
//!
//! # Important
//!
//! - Output lines are written with an explicit `\n`, not `println!`
//! - Each line is flushed immediately so program output is not delayed

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Writable destination for one captured log.
pub type LogSink = Box<dyn Write + Send>;

/// Receives hub output lines that are not status or log traffic.
pub trait OutputSink: Send {
    /// Write one line (without terminator).
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Opens log sinks by the name the hub announces.
pub trait LogStore: Send {
    /// Open (create or truncate) the log called `name`.
    fn open(&mut self, name: &str) -> Result<LogSink>;
}

/// Output sink writing to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        terminate_line(&mut std::io::stdout().lock(), line)
    }
}

fn terminate_line(out: &mut impl Write, line: &str) -> Result<()> {
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// Log store creating one file per log inside a directory.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    /// Store logs in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store logs in the current working directory.
    pub fn current_dir() -> Self {
        Self::new(".")
    }

    /// Directory the logs are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LogStore for FileLogStore {
    fn open(&mut self, name: &str) -> Result<LogSink> {
        let path = self.dir.join(name);
        let file = File::create(&path)?;
        tracing::debug!("Created log file {}", path.display());
        Ok(Box::new(BufWriter::new(file)))
    }
}
