//! Trigger and liveness command handlers

use anyhow::{Context, Result};
use colored::*;
use keel_core::dto::trigger::SubmissionStatus;
use std::path::PathBuf;

use crate::config::Config;

/// Trigger a deployment and print the acknowledgement
pub async fn trigger(config: &Config, payload: Option<PathBuf>) -> Result<()> {
    let body = match payload {
        Some(path) => std::fs::read(&path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?,
        None => Vec::new(),
    };

    let client = config.client();
    let ack = match client.trigger_deploy(body).await {
        Ok(ack) => ack,
        Err(e) if e.is_conflict() => {
            println!("{} {}", "✗".red(), "Deployment in progress, trigger rejected".red());
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Failed to trigger deployment"),
    };

    let status = match ack.status {
        SubmissionStatus::Started => "started".green(),
        SubmissionStatus::Queued => "queued".yellow(),
        SubmissionStatus::Rejected => "rejected".red(),
    };

    println!("{} Deployment {}: {}", "✓".green(), status, ack.message);
    if let Some(run_id) = ack.run_id {
        println!("  Run ID: {}", run_id.to_string().cyan());
    }

    Ok(())
}

pub async fn health(config: &Config) -> Result<()> {
    let text = config
        .client()
        .health()
        .await
        .context("Orchestrator is not reachable")?;
    println!("{}", text.green());
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    let text = config
        .client()
        .status()
        .await
        .context("Failed to query orchestrator status")?;

    if text.contains("in progress") {
        println!("{}", text.yellow());
    } else {
        println!("{}", text.green());
    }
    Ok(())
}
