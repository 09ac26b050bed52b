//! Execution context for deployment runs
//!
//! Contains what every stage needs while a run is active:
//! - The log sink receiving stage records
//! - The command runner used to touch the host
//! - Run-scoped limits from the configuration

use keel_core::domain::log::{LogEntry, LogLevel};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::service::LogSink;

/// Execution context shared by the stages of one run
pub struct RunContext {
    pub run_id: Uuid,
    sink: Arc<dyn LogSink>,
    runner: Arc<dyn CommandRunner>,
    /// Wait between starting a service and re-checking it
    pub settle_interval: Duration,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        sink: Arc<dyn LogSink>,
        runner: Arc<dyn CommandRunner>,
        settle_interval: Duration,
    ) -> Self {
        Self {
            run_id,
            sink,
            runner,
            settle_interval,
        }
    }

    /// Records an entry in the sink and mirrors it to tracing
    pub fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!(run_id = %self.run_id, "{}", message),
            LogLevel::Info => tracing::info!(run_id = %self.run_id, "{}", message),
            LogLevel::Warning => tracing::warn!(run_id = %self.run_id, "{}", message),
            LogLevel::Error => tracing::error!(run_id = %self.run_id, "{}", message),
        }
        self.sink
            .record(&LogEntry::now(level, Some(self.run_id), message));
    }

    pub fn log_debug(&self, message: String) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: String) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }

    /// Runs a command, logging the invocation and any truncation
    pub async fn exec(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.log_debug(format!("$ {}", spec));
        let output = self.runner.run(spec).await?;

        if output.truncated {
            self.log_warning(format!("Output of `{}` was truncated", spec));
        }
        if !output.success() {
            self.log_debug(format!("`{}` failed: {}", spec, output.failure_summary()));
        }

        Ok(output)
    }
}
