//! Run History Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use keel_core::domain::run::DeploymentRun;
use keel_core::dto::run::RunSummary;
use keel_runner::RunScheduler;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// GET /runs
/// Recent runs, newest first
pub async fn list_runs(
    State(scheduler): State<RunScheduler>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    let limit = query.limit.unwrap_or(20);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be greater than 0".to_string()));
    }

    let runs = scheduler.recent_runs(limit);
    tracing::debug!("Listing {} run(s)", runs.len());

    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /runs/{id}
/// Full run record including stage outcomes
pub async fn get_run(
    State(scheduler): State<RunScheduler>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeploymentRun>> {
    scheduler
        .get_run(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}
