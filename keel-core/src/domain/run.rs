//! Deployment run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::stage::{PipelineState, StageKind, StageOutcome, StageStatus};

/// Activation signal received by the trigger endpoint
///
/// The payload is opaque to the pipeline; only the arrival matters.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub received_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl TriggerEvent {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            received_at: Utc::now(),
            payload: payload.into(),
        }
    }
}

/// Status of a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    /// Completed, but at least one warn-and-continue condition was logged
    Partial,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Classification of a run failure or warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CapabilityUnavailable,
    SyncFailure,
    InstallFailure,
    VerificationMismatch,
    BuildFailure,
    ReconcileFailure,
    ProxyReloadFailure,
    Timeout,
    ProcessCheckWarning,
    CommandFailure,
    InvalidPlan,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::CapabilityUnavailable => "CapabilityUnavailable",
            FailureKind::SyncFailure => "SyncFailure",
            FailureKind::InstallFailure => "InstallFailure",
            FailureKind::VerificationMismatch => "VerificationMismatch",
            FailureKind::BuildFailure => "BuildFailure",
            FailureKind::ReconcileFailure => "ReconcileFailure",
            FailureKind::ProxyReloadFailure => "ProxyReloadFailure",
            FailureKind::Timeout => "Timeout",
            FailureKind::ProcessCheckWarning => "ProcessCheckWarning",
            FailureKind::CommandFailure => "CommandFailure",
            FailureKind::InvalidPlan => "InvalidPlan",
        };
        write!(f, "{}", name)
    }
}

/// Why a run reached `Terminal(failed)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Option<StageKind>,
    pub kind: FailureKind,
    pub message: String,
}

/// One execution of the deployment pipeline
///
/// Owned by the pipeline controller while it runs. Once a terminal status has
/// been recorded, further mutations are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    /// Stage currently (or last) executing
    pub current_stage: Option<StageKind>,
    pub status: RunStatus,
    pub outcomes: Vec<StageOutcome>,
    pub failure: Option<RunFailure>,
}

impl DeploymentRun {
    pub fn new(id: Uuid, event: &TriggerEvent) -> Self {
        Self {
            id,
            triggered_at: event.received_at,
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::Idle,
            current_stage: None,
            status: RunStatus::Running,
            outcomes: Vec::new(),
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the state machine to the state of the given stage
    pub fn enter(&mut self, stage: StageKind) {
        if self.is_terminal() {
            return;
        }
        self.state = stage.state();
        self.current_stage = Some(stage);
    }

    /// Appends a stage outcome
    pub fn record(&mut self, outcome: StageOutcome) {
        if self.is_terminal() {
            return;
        }
        self.outcomes.push(outcome);
    }

    /// Records the cause of an abort; the first recorded failure wins
    pub fn fail(
        &mut self,
        stage: Option<StageKind>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        if self.is_terminal() || self.failure.is_some() {
            return;
        }
        self.failure = Some(RunFailure {
            stage,
            kind,
            message: message.into(),
        });
    }

    /// Records the terminal status and freezes the run
    pub fn finish(&mut self) -> RunStatus {
        if self.is_terminal() {
            return self.status;
        }

        self.status = if self.failure.is_some() {
            RunStatus::Failed
        } else if self
            .outcomes
            .iter()
            .any(|o| o.status == StageStatus::Warned)
        {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        self.state = PipelineState::Terminal;
        self.finished_at = Some(Utc::now());
        self.status
    }

    /// Outcome recorded for a stage, if it ran
    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn failed_stage(&self) -> Option<StageKind> {
        self.failure.as_ref().and_then(|f| f.stage)
    }
}
