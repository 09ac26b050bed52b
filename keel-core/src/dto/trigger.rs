//! Trigger DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the scheduler handled a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// A run started immediately
    Started,
    /// A run is active; this trigger runs after the ones queued before it
    Queued,
    /// A run is active and the policy rejects concurrent triggers
    Rejected,
}

/// Acknowledgement returned by `POST /deploy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerAck {
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub message: String,
}
