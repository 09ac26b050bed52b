//! Keel Orchestrator
//!
//! Receives deployment triggers over HTTP, acknowledges them immediately and
//! runs the deployment pipeline in the background, one run at a time.

use anyhow::{Context, Result};
use keel_runner::exec::SystemCommandRunner;
use keel_runner::plan::load_plan;
use keel_runner::service::FileLogSink;
use keel_runner::{PipelineController, RunScheduler, RunnerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "keel_orchestrator=debug,keel_runner=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Orchestrator...");

    let config = load_config()?;
    info!(
        "Loaded configuration: plan={}, log_dir={}, run_timeout={:?}, trigger_policy={:?}",
        config.plan_path.display(),
        config.log_dir.display(),
        config.run_timeout,
        config.trigger_policy
    );

    let plan = load_plan(&config.plan_path)
        .with_context(|| format!("Failed to load plan {}", config.plan_path.display()))?;
    info!(
        "Loaded plan '{}': {} capabilities, {} processes, {} routes",
        plan.name,
        plan.capabilities.len(),
        plan.processes.len(),
        plan.proxy.routes.len()
    );

    let sink = FileLogSink::open(&config.log_dir)
        .with_context(|| format!("Failed to open log directory {}", config.log_dir.display()))?;
    let runner = SystemCommandRunner::new(config.max_output_bytes);

    let controller = Arc::new(PipelineController::new(
        Arc::new(plan),
        config.clone(),
        Arc::new(runner),
        Arc::new(sink),
    ));
    let scheduler = RunScheduler::new(controller, config.trigger_policy, config.history_size);

    // Build router with all API endpoints
    let app = api::create_router(scheduler.clone());

    // Get bind address
    let addr = std::env::var("KEEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if scheduler.is_active() {
        info!("Waiting for the active deployment to finish");
        scheduler.wait_idle().await;
    }

    info!("Keel Orchestrator stopped");
    Ok(())
}

/// Loads configuration from environment variables
fn load_config() -> Result<RunnerConfig> {
    let config = RunnerConfig::from_env().context("Invalid configuration in environment")?;
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
