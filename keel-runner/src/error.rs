//! Pipeline error taxonomy

use keel_core::domain::run::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by pipeline stages
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required capability is missing after provisioning
    #[error("capability '{0}' is unavailable")]
    CapabilityUnavailable(String),

    #[error("source sync failed: {0}")]
    SyncFailure(String),

    #[error("dependency install failed: {0}")]
    InstallFailure(String),

    /// Required packages missing (or at the wrong version) after install
    #[error("required packages missing after install: {}", .missing.join(", "))]
    VerificationMismatch { missing: Vec<String> },

    #[error("build failed: {0}")]
    BuildFailure(String),

    #[error("process reconcile failed: {0}")]
    ReconcileFailure(String),

    #[error("proxy reload failed: {0}")]
    ProxyReloadFailure(String),

    #[error("deployment run exceeded {0:?}")]
    Timeout(Duration),

    #[error("process check: {0}")]
    ProcessCheckWarning(String),

    /// A command could not be spawned or its output could not be read
    #[error("failed to run `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid deployment plan: {0}")]
    Plan(String),
}

impl PipelineError {
    /// Kind recorded in the deployment run
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::CapabilityUnavailable(_) => FailureKind::CapabilityUnavailable,
            PipelineError::SyncFailure(_) => FailureKind::SyncFailure,
            PipelineError::InstallFailure(_) => FailureKind::InstallFailure,
            PipelineError::VerificationMismatch { .. } => FailureKind::VerificationMismatch,
            PipelineError::BuildFailure(_) => FailureKind::BuildFailure,
            PipelineError::ReconcileFailure(_) => FailureKind::ReconcileFailure,
            PipelineError::ProxyReloadFailure(_) => FailureKind::ProxyReloadFailure,
            PipelineError::Timeout(_) => FailureKind::Timeout,
            PipelineError::ProcessCheckWarning(_) => FailureKind::ProcessCheckWarning,
            PipelineError::Command { .. } => FailureKind::CommandFailure,
            PipelineError::Plan(_) => FailureKind::InvalidPlan,
        }
    }
}
