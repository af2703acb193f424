//! Line-oriented handling of streamed command output.
//!
//! Remote sides hand over output in arbitrary chunks that rarely line up with
//! line boundaries. [`LineSplitter`] buffers partial lines across chunks, and
//! [`OutputCollector`] routes the completed lines to the console and the log
//! file while optionally capturing the raw stdout text.

use console::style;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Number of bytes requested per read when draining a stream.
pub const STREAM_CHUNK_SIZE: usize = 256;

/// Prefix that marks stderr lines in the console and in logs.
pub const STDERR_PREFIX: &str = "stderr: ";

/// Receives raw output chunks as they arrive from a running command.
pub trait OutputHandler {
    fn stdout(&mut self, chunk: &[u8]);
    fn stderr(&mut self, chunk: &[u8]);
}

/// Splits a byte stream into lines, buffering incomplete trailing data.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(Self::decode(&self.pending));
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Returns the unterminated remainder, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = Self::decode(&self.pending);
        self.pending.clear();
        Some(line)
    }

    fn decode(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Console echo plus an optional log file.
///
/// The log file is opened in append mode and owned by whoever created the
/// sink; call [`LogSink::close`] to flush it.
#[derive(Debug, Default)]
pub struct LogSink {
    file: Option<(PathBuf, File)>,
}

impl LogSink {
    /// A sink that only writes to the console.
    pub fn console() -> Self {
        Self { file: None }
    }

    /// A sink that also appends every line to `path`.
    pub fn with_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some((path.to_path_buf(), file)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(p, _)| p.as_path())
    }

    /// Writes a stdout line.
    pub fn line(&self, line: &str, quiet: bool) {
        if !quiet {
            println!("{}", line);
        }
        self.write_file(line);
    }

    /// Writes a stderr line with its prefix.
    pub fn stderr_line(&self, line: &str, quiet: bool) {
        if !quiet {
            println!("{}{}", style(STDERR_PREFIX).red(), line);
        }
        self.write_file(&format!("{}{}", STDERR_PREFIX, line));
    }

    /// Writes a status message such as "Running '...' remotely".
    pub fn status(&self, message: &str, quiet: bool) {
        if !quiet {
            println!("{}", style(message).cyan());
        }
        self.write_file(message);
    }

    fn write_file(&self, line: &str) {
        if let Some((path, file)) = &self.file {
            let mut file: &File = file;
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write to log file {}: {}", path.display(), e);
            }
        }
    }

    /// Flushes and releases the log file.
    pub fn close(&mut self) -> Result<()> {
        if let Some((_, mut file)) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Routes output of one command to a [`LogSink`].
pub struct OutputCollector<'a> {
    sink: &'a LogSink,
    quiet: bool,
    stdout: LineSplitter,
    stderr: LineSplitter,
    captured: Option<Vec<u8>>,
}

impl<'a> OutputCollector<'a> {
    pub fn new(sink: &'a LogSink, quiet: bool, capture: bool) -> Self {
        Self {
            sink,
            quiet,
            stdout: LineSplitter::new(),
            stderr: LineSplitter::new(),
            captured: capture.then(Vec::new),
        }
    }

    /// Flushes partial lines and returns the captured stdout, if capturing.
    pub fn finish(mut self) -> Option<String> {
        if let Some(rest) = self.stdout.finish() {
            self.sink.line(&rest, self.quiet);
        }
        if let Some(rest) = self.stderr.finish() {
            self.sink.stderr_line(&rest, self.quiet);
        }
        self.captured
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl OutputHandler for OutputCollector<'_> {
    fn stdout(&mut self, chunk: &[u8]) {
        if let Some(buf) = self.captured.as_mut() {
            buf.extend_from_slice(chunk);
        }
        for line in self.stdout.push(chunk) {
            self.sink.line(&line, self.quiet);
        }
    }

    fn stderr(&mut self, chunk: &[u8]) {
        for line in self.stderr.push(chunk) {
            self.sink.stderr_line(&line, self.quiet);
        }
    }
}
