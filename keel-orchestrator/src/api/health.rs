//! Health and Readiness Handlers
//!
//! Both answer synchronously and never wait on the pipeline.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use keel_runner::RunScheduler;

/// GET /health
/// Liveness check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
/// Readiness check
pub async fn status(State(scheduler): State<RunScheduler>) -> impl IntoResponse {
    let text = if scheduler.is_active() {
        "ready (deployment in progress)"
    } else {
        "ready (idle)"
    };
    (StatusCode::OK, text)
}
