//! Append-only diagnostic sink.
//!
//! Every recoverable event of a subject pass lands here. When bound to a
//! results directory, each message is appended to `Issues.txt`, opening the
//! file in append mode per write so concurrent subject passes never share a
//! handle.

use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the per-subject issues log
pub const ISSUES_FILENAME: &str = "Issues.txt";

#[derive(Debug)]
pub struct IssueLog {
    subject: String,
    path: Option<PathBuf>,
    entries: Mutex<Vec<String>>,
}

impl IssueLog {
    /// Log that keeps messages in memory only
    pub fn in_memory(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Log that also appends to `<dir>/Issues.txt`
    pub fn in_dir(subject: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        Self {
            subject: subject.into(),
            path: Some(dir.as_ref().join(ISSUES_FILENAME)),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one issue
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(subject = %self.subject, "{}", message);

        if let Some(path) = &self.path {
            let written = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{}", message));
            if let Err(e) = written {
                tracing::error!(path = %path.display(), "Could not append to issues log: {}", e);
            }
        }

        self.entries.lock().push(message);
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Any recorded message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|m| m.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
