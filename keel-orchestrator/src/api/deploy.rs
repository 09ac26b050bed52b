//! Deploy Trigger Handler

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use keel_core::domain::run::TriggerEvent;
use keel_core::dto::trigger::{SubmissionStatus, TriggerAck};
use keel_runner::RunScheduler;

use crate::api::error::{ApiError, ApiResult};

/// POST /deploy
/// Schedules a deployment run and acknowledges without waiting for it
///
/// The body is recorded as the trigger payload but not interpreted.
pub async fn trigger_deploy(
    State(scheduler): State<RunScheduler>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TriggerAck>)> {
    tracing::info!("Deploy trigger received ({} bytes)", body.len());

    let submission = scheduler.submit(TriggerEvent::new(body.to_vec()));
    let ack = submission.ack();

    match submission.status {
        SubmissionStatus::Rejected => Err(ApiError::Conflict(ack.message)),
        _ => Ok((StatusCode::ACCEPTED, Json(ack))),
    }
}
