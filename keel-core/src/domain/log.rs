//! Log domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A log entry produced during a deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    /// Run that produced the entry, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub message: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current time
    pub fn now(level: LogLevel, run_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            run_id,
            message: message.into(),
        }
    }

    /// Formats the entry as a single log line
    pub fn to_line(&self) -> String {
        match self.run_id {
            Some(run_id) => format!(
                "{} {} [{}] {}",
                self.timestamp.to_rfc3339(),
                self.level,
                run_id,
                self.message
            ),
            None => format!(
                "{} {} {}",
                self.timestamp.to_rfc3339(),
                self.level,
                self.message
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}
