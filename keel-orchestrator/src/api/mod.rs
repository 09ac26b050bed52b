//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific concern.

pub mod deploy;
pub mod error;
pub mod health;
pub mod runs;

use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use keel_runner::RunScheduler;
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::api::error::ApiError;

/// Create the main API router with all endpoints
pub fn create_router(scheduler: RunScheduler) -> Router {
    Router::new()
        // Liveness and readiness
        .route("/health", get(health::health_check))
        .route("/status", get(health::status))
        // Trigger endpoint
        .route("/deploy", post(deploy::trigger_deploy))
        // Run history
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run))
        .fallback(not_found)
        // Add state and middleware
        .with_state(scheduler)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

/// Turns a handler panic into a generic 500
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    ApiError::InternalError(format!("handler panicked: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use keel_core::domain::run::DeploymentRun;
    use keel_core::dto::run::RunSummary;
    use keel_core::dto::trigger::{SubmissionStatus, TriggerAck};
    use keel_runner::service::MemoryLogSink;
    use keel_runner::testing::{ScriptedRunner, sample_plan};
    use keel_runner::{PipelineController, RunnerConfig, TriggerPolicy};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn scheduler(dir: &std::path::Path, policy: TriggerPolicy, delay: Duration) -> RunScheduler {
        let config = RunnerConfig::new(dir.join("keel.yaml"), dir.join("logs"))
            .with_settle_interval(Duration::ZERO)
            .with_trigger_policy(policy);
        let runner = ScriptedRunner::healthy().delay("git fetch", delay);
        let controller = PipelineController::new(
            Arc::new(sample_plan(dir)),
            config,
            Arc::new(runner),
            Arc::new(MemoryLogSink::new()),
        );
        RunScheduler::new(Arc::new(controller), policy, 10)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from("{\"ref\":\"refs/heads/main\"}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_and_idle_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(scheduler(dir.path(), TriggerPolicy::Queue, Duration::ZERO));

        let (status, body) = send(app.clone(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let (status, body) = send(app, "GET", "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ready (idle)");
    }

    #[tokio::test]
    async fn test_deploy_acknowledges_before_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), TriggerPolicy::Queue, Duration::from_secs(2));
        let app = create_router(scheduler.clone());

        let started = tokio::time::Instant::now();
        let (status, body) = send(app.clone(), "POST", "/deploy").await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(status, StatusCode::ACCEPTED);
        let ack: TriggerAck = serde_json::from_slice(&body).unwrap();
        assert_eq!(ack.status, SubmissionStatus::Started);

        let (_, body) = send(app.clone(), "GET", "/status").await;
        assert_eq!(body, b"ready (deployment in progress)");

        let (status, body) = send(app.clone(), "POST", "/deploy").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let queued: TriggerAck = serde_json::from_slice(&body).unwrap();
        assert_eq!(queued.status, SubmissionStatus::Queued);

        let (status, body) = send(app, "GET", &format!("/runs/{}", ack.run_id.unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        let run: DeploymentRun = serde_json::from_slice(&body).unwrap();
        assert!(!run.is_terminal());
    }

    #[tokio::test]
    async fn test_reject_policy_returns_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(scheduler(
            dir.path(),
            TriggerPolicy::Reject,
            Duration::from_secs(2),
        ));

        let (status, _) = send(app.clone(), "POST", "/deploy").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(app, "POST", "/deploy").await;
        assert_eq!(status, StatusCode::CONFLICT);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "deployment in progress");
    }

    #[tokio::test]
    async fn test_runs_listing_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), TriggerPolicy::Queue, Duration::ZERO);
        let app = create_router(scheduler.clone());

        send(app.clone(), "POST", "/deploy").await;
        tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
            .await
            .unwrap();

        let (status, body) = send(app.clone(), "GET", "/runs?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        let runs: Vec<RunSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].stages_completed, 9);

        let (status, _) = send(app, "GET", "/runs?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_paths_get_generic_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(scheduler(dir.path(), TriggerPolicy::Queue, Duration::ZERO));

        let (status, body) = send(app.clone(), "GET", "/wp-admin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Not found");

        let (status, _) = send(app, "GET", &format!("/runs/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn boom() -> &'static str {
        panic!("connection string mongodb://admin:hunter2@db")
    }

    #[tokio::test]
    async fn test_panic_does_not_leak_details() {
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(handle_panic));

        let (status, body) = send(app, "GET", "/boom").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let text = String::from_utf8(body).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("Internal server error"));
    }
}
