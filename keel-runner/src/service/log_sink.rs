//! Log sink service
//!
//! Receives the stage start/outcome records of deployment runs. The file sink
//! appends every entry to `deploy.log` and failures to `deploy-error.log`;
//! the memory sink keeps entries for inspection by tests.

use keel_core::domain::log::{LogEntry, LogLevel};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Destination for deployment log entries
pub trait LogSink: Send + Sync {
    /// Records a log entry
    ///
    /// Sinks must not fail the pipeline; write errors are reported through
    /// tracing and otherwise swallowed.
    fn record(&self, entry: &LogEntry);
}

/// Append-only file sink with a parallel error-only file
pub struct FileLogSink {
    all: Mutex<File>,
    errors: Mutex<File>,
}

impl FileLogSink {
    pub const LOG_FILE: &'static str = "deploy.log";
    pub const ERROR_FILE: &'static str = "deploy-error.log";

    /// Opens (creating if needed) both log files in `dir`
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            all: Mutex::new(open_append(&dir.join(Self::LOG_FILE))?),
            errors: Mutex::new(open_append(&dir.join(Self::ERROR_FILE))?),
        })
    }

    fn append(file: &Mutex<File>, line: &str) {
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write deployment log: {}", e);
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl LogSink for FileLogSink {
    fn record(&self, entry: &LogEntry) {
        let line = entry.to_line();
        Self::append(&self.all, &line);
        if entry.level == LogLevel::Error {
            Self::append(&self.errors, &line);
        }
    }
}

/// In-memory sink
///
/// Uses Arc<Mutex<Vec<LogEntry>>> so clones share one buffer.
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries
    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any entry contains the given text
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, entry: &LogEntry) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_file_sink_splits_errors() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::open(dir.path()).unwrap();
        let run_id = Some(Uuid::new_v4());

        sink.record(&LogEntry::now(LogLevel::Info, run_id, "Starting stage: sync-source"));
        sink.record(&LogEntry::now(LogLevel::Error, run_id, "Stage 'sync-source' failed"));

        let all = std::fs::read_to_string(dir.path().join(FileLogSink::LOG_FILE)).unwrap();
        let errors = std::fs::read_to_string(dir.path().join(FileLogSink::ERROR_FILE)).unwrap();

        assert_eq!(all.lines().count(), 2);
        assert_eq!(errors.lines().count(), 1);
        assert!(errors.contains("Stage 'sync-source' failed"));
    }

    #[test]
    fn test_file_sink_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        FileLogSink::open(dir.path())
            .unwrap()
            .record(&LogEntry::now(LogLevel::Info, None, "first"));
        FileLogSink::open(dir.path())
            .unwrap()
            .record(&LogEntry::now(LogLevel::Info, None, "second"));

        let all = std::fs::read_to_string(dir.path().join(FileLogSink::LOG_FILE)).unwrap();
        let lines: Vec<&str> = all.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[test]
    fn test_memory_sink_clones_share_entries() {
        let sink = MemoryLogSink::new();
        let clone = sink.clone();
        sink.record(&LogEntry::now(LogLevel::Info, None, "test1"));
        clone.record(&LogEntry::now(LogLevel::Error, None, "test2"));

        assert!(sink.contains("test2"));
        assert_eq!(sink.entries().len(), 2);
    }
}
