//! Serialized output channel for per-task results
//!
//! Workers compute privately and only touch shared state to emit a finished
//! line. The reporter is the single lock in the harness, and it is held for
//! exactly one `write_all` + `flush`:
//!
//! - **`report()`** - formats `Task <id>: <value>` outside the lock, then
//!   writes the whole line under it. Lines from different tasks never
//!   splice; their relative order is first-come-first-served.
//! - **`write_line()`** - the same guarantee for an arbitrary pre-formatted
//!   line.
//!
//! # Example
//!
//! ```
//! use shardjoin::report::SyncReporter;
//!
//! let reporter = SyncReporter::new(Vec::new());
//! reporter.report(0, 1000).unwrap();
//! reporter.report(1, 1000).unwrap();
//!
//! let out = String::from_utf8(reporter.into_inner()).unwrap();
//! assert_eq!(out, "Task 0: 1000\nTask 1: 1000\n");
//! ```

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

/// Errors that can occur while emitting a line
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write report line: {0}")]
    Io(#[from] io::Error),
}

/// A line sink shared by all tasks of a batch
///
/// The reporter tracks output statistics for diagnostics:
/// - `lines_written`: number of complete lines emitted
/// - `bytes_written`: total bytes emitted, newlines included
#[derive(Debug)]
pub struct SyncReporter<W> {
    /// The underlying writer
    sink: Mutex<W>,

    /// Number of lines written (for diagnostics)
    lines_written: AtomicU64,

    /// Total bytes written (for diagnostics)
    bytes_written: AtomicU64,
}

impl SyncReporter<io::Stdout> {
    /// Reporter over the process's standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> SyncReporter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            lines_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Emit `Task <id>: <value>` as one uninterrupted line
    pub fn report<V: Display>(&self, task: usize, value: V) -> Result<(), ReportError> {
        self.write_line(&format!("Task {}: {}", task, value))
    }

    /// Emit a pre-formatted line; a trailing newline is appended
    pub fn write_line(&self, line: &str) -> Result<(), ReportError> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        {
            let mut sink = self.sink.lock();
            sink.write_all(buf.as_bytes())?;
            sink.flush()?;
        }

        self.lines_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the number of lines written
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Returns the total bytes written
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Reset all diagnostic counters
    pub fn reset_counters(&self) {
        self.lines_written.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }

    /// Consume the reporter and return the writer
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

/// Snapshot of reporter output statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDiagnostics {
    /// Number of lines written
    pub lines_written: u64,

    /// Total bytes written
    pub bytes_written: u64,
}

impl<W: Write> From<&SyncReporter<W>> for ReportDiagnostics {
    fn from(reporter: &SyncReporter<W>) -> Self {
        Self {
            lines_written: reporter.lines_written(),
            bytes_written: reporter.bytes_written(),
        }
    }
}
