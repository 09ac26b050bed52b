//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{DeploymentRun, FailureKind, RunStatus};
use crate::domain::stage::{PipelineState, StageKind};

/// Lightweight view of a deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: RunStatus,
    pub state: PipelineState,
    pub triggered_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages_completed: usize,
    pub failed_stage: Option<StageKind>,
    pub failure_kind: Option<FailureKind>,
}

impl From<&DeploymentRun> for RunSummary {
    fn from(run: &DeploymentRun) -> Self {
        Self {
            id: run.id,
            status: run.status,
            state: run.state,
            triggered_at: run.triggered_at,
            finished_at: run.finished_at,
            stages_completed: run.outcomes.len(),
            failed_stage: run.failed_stage(),
            failure_kind: run.failure.as_ref().map(|f| f.kind),
        }
    }
}
