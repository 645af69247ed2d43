//! Decode log: the timestamped record of what happened to each archive.
//!
//! A [`LogSink`] lives for one batch run. Each archive gets an [`ArchiveLog`]
//! view that stamps entries with its id; the view appends its own lines to
//! the archive's `cbt2git.log` and the sink writes one consolidated log,
//! sorted by timestamp, when the batch ends.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{Local, NaiveDateTime};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: NaiveDateTime,
    pub archive_id: String,
    pub message: String,
}

impl LogEntry {
    /// `timestamp - message`, as written to an archive's own log.
    pub fn archive_line(&self) -> String {
        format!("{} - {}", self.at.format(TIMESTAMP_FORMAT), self.message)
    }

    /// `timestamp - archive - message`, as written to the batch log.
    pub fn batch_line(&self) -> String {
        format!(
            "{} - {} - {}",
            self.at.format(TIMESTAMP_FORMAT),
            self.archive_id,
            self.message
        )
    }
}

#[derive(Debug, Default)]
pub struct LogSink {
    entries: Vec<LogEntry>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start logging for one archive.
    pub fn archive(&mut self, archive_id: &str) -> ArchiveLog<'_> {
        let start = self.entries.len();
        ArchiveLog {
            sink: self,
            archive_id: archive_id.to_string(),
            start,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in timestamp order. Entries with equal stamps keep
    /// insertion order.
    pub fn sorted(&self) -> Vec<&LogEntry> {
        let mut sorted: Vec<&LogEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.at);
        sorted
    }

    pub fn write_consolidated(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for entry in self.sorted() {
            out.push_str(&entry.batch_line());
            out.push('\n');
        }
        std::fs::write(path, out)
    }
}

/// Per-archive view over a [`LogSink`].
pub struct ArchiveLog<'a> {
    sink: &'a mut LogSink,
    archive_id: String,
    start: usize,
}

impl ArchiveLog<'_> {
    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(archive = %self.archive_id, "{}", message);
        self.push(Local::now().naive_local(), message);
    }

    /// Record a degraded outcome; also surfaces as a diagnostic warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(archive = %self.archive_id, "{}", message);
        self.push(Local::now().naive_local(), message);
    }

    pub fn record_at(&mut self, at: NaiveDateTime, message: impl Into<String>) {
        self.push(at, message.into());
    }

    fn push(&mut self, at: NaiveDateTime, message: String) {
        self.sink.entries.push(LogEntry {
            at,
            archive_id: self.archive_id.clone(),
            message,
        });
    }

    /// Entries recorded through this view.
    pub fn entries(&self) -> &[LogEntry] {
        &self.sink.entries[self.start..]
    }

    /// Append this archive's lines to its log file.
    pub fn append_to_file(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for entry in self.entries() {
            writeln!(file, "{}", entry.archive_line())?;
        }
        Ok(())
    }
}
