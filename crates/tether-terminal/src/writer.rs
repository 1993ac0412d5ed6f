//! Line-capture writer.
//!
//! Collects every input line in memory until a line consisting of exactly
//! `.` arrives, then flushes the whole buffer to the target file in one
//! go. The target is never touched before that; a cancelled capture
//! leaves the file as it was.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tether_types::error::{Result, TetherError};

/// Line that ends a capture.
pub const SENTINEL: &str = ".";

/// How captured text lands in the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Result of feeding one line to the writer.
#[derive(Debug, PartialEq, Eq)]
pub enum WriterStep {
    /// Line buffered; nothing to report this turn.
    Captured,
    /// Sentinel received; the capture is over either way.
    Finished(String),
}

/// State of one capture in progress.
#[derive(Debug)]
pub struct Writer {
    path: PathBuf,
    mode: WriteMode,
    buffer: Vec<String>,
}

impl Writer {
    pub fn new(path: PathBuf, mode: WriteMode) -> Self {
        Self {
            path,
            mode,
            buffer: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines captured so far.
    pub fn buffered(&self) -> &[String] {
        &self.buffer
    }

    /// Text shown when the capture starts.
    pub fn banner(&self) -> String {
        let verb = match self.mode {
            WriteMode::Overwrite => "Writing to",
            WriteMode::Append => "Appending to",
        };
        format!(
            "{verb} {}. End with a single '{SENTINEL}' on a line.",
            self.path.display()
        )
    }

    /// Feed one input line.
    pub fn handle(&mut self, line: &str) -> WriterStep {
        if line != SENTINEL {
            self.buffer.push(line.to_string());
            return WriterStep::Captured;
        }
        match self.flush() {
            Ok(()) => WriterStep::Finished(format!("{} saved successfully.", self.path.display())),
            Err(e) => {
                log::warn!("write flush failed: {e}");
                WriterStep::Finished(format!("write: {e}"))
            },
        }
    }

    fn flush(&self) -> Result<()> {
        let mut options = OpenOptions::new();
        match self.mode {
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };
        let mut file = options
            .open(&self.path)
            .map_err(|e| TetherError::resource(&self.path, e))?;

        let mut data = String::new();
        if self.mode == WriteMode::Append {
            let existing_len = file
                .metadata()
                .map_err(|e| TetherError::resource(&self.path, e))?
                .len();
            if existing_len > 0 {
                data.push('\n');
            }
        }
        data.push_str(&self.buffer.join("\n"));
        data.push('\n');
        file.write_all(data.as_bytes())
            .map_err(|e| TetherError::resource(&self.path, e))
    }
}

/// Parse `write [-a] <file>` operands into a mode and a raw path.
pub fn parse_write_args<'a>(args: &[&'a str]) -> Result<(WriteMode, &'a str)> {
    let missing = || TetherError::Command("write: missing filename".to_string());
    match args {
        ["-a", path, ..] => Ok((WriteMode::Append, *path)),
        ["-a"] | [] => Err(missing()),
        [path, ..] => Ok((WriteMode::Overwrite, *path)),
    }
}
