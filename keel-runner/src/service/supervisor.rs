//! Process supervisor controller
//!
//! Regenerates the process manifest in full on every run, then performs a
//! stop-all/start-all reconciliation against the supervisor. No incremental
//! diffing: the running set is made equal to the desired set by removing
//! everything and starting every declared process.

use keel_core::domain::plan::DeploymentPlan;
use keel_core::domain::process::ProcessDescriptor;
use serde_json::json;
use std::collections::HashSet;

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandSpec;
use crate::service::atomic::write_atomic;

/// What the reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    /// Processes the supervisor refused to start
    pub failed: Vec<String>,
    pub warnings: Vec<String>,
}

/// Renders the supervisor manifest for the desired process set
pub fn render_manifest(processes: &[ProcessDescriptor]) -> Result<String> {
    let apps: Vec<_> = processes
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "script": p.script,
                "cwd": p.cwd,
                "interpreter": p.interpreter,
                "env": p.env,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json!({ "apps": apps }))
        .map_err(|e| PipelineError::ReconcileFailure(format!("failed to render manifest: {}", e)))
}

fn ensure_unique_names(processes: &[ProcessDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for process in processes {
        if !seen.insert(process.name.as_str()) {
            return Err(PipelineError::ReconcileFailure(format!(
                "duplicate process name '{}'",
                process.name
            )));
        }
    }
    Ok(())
}

/// Makes the supervisor's running set equal to the plan's process set
///
/// Individual start failures do not fail the stage; they are returned in the
/// report and surfaced during verification.
pub async fn reconcile(ctx: &RunContext, plan: &DeploymentPlan) -> Result<ReconcileReport> {
    ensure_unique_names(&plan.processes)?;

    let manifest = plan.resolve(&plan.supervisor.manifest);
    let rendered = render_manifest(&plan.processes)?;
    write_atomic(&manifest, &rendered).await.map_err(|e| {
        PipelineError::ReconcileFailure(format!(
            "failed to write {}: {}",
            manifest.display(),
            e
        ))
    })?;
    ctx.log_info(format!(
        "Wrote manifest {} ({} processes)",
        manifest.display(),
        plan.processes.len()
    ));

    let program = plan.supervisor.program.as_str();
    let manifest_arg = manifest.to_string_lossy().to_string();
    let mut report = ReconcileReport::default();

    // Nothing running is a valid prior state
    let stop = CommandSpec::new(program).args(["delete", "all"]);
    match ctx.exec(&stop).await {
        Ok(output) if output.success() => ctx.log_debug("Removed managed processes".to_string()),
        Ok(_) | Err(_) => ctx.log_info("No managed processes to remove".to_string()),
    }

    for process in &plan.processes {
        let start = CommandSpec::new(program)
            .args(["start", manifest_arg.as_str(), "--only", process.name.as_str()])
            .cwd(&process.cwd);

        let result = ctx.exec(&start).await;
        match result {
            Ok(output) if output.success() => {
                ctx.log_info(format!("Started process '{}'", process.name));
                report.started.push(process.name.clone());
            }
            Ok(output) => {
                ctx.log_warning(format!(
                    "Process '{}' failed to start ({})",
                    process.name,
                    output.failure_summary()
                ));
                report.failed.push(process.name.clone());
            }
            Err(e) => {
                ctx.log_warning(format!("Process '{}' failed to start: {}", process.name, e));
                report.failed.push(process.name.clone());
            }
        }
    }

    let save = CommandSpec::new(program).arg("save");
    let saved = matches!(ctx.exec(&save).await, Ok(output) if output.success());
    if !saved {
        let warning = "failed to persist the process list for restarts".to_string();
        ctx.log_warning(warning.clone());
        report.warnings.push(warning);
    }

    Ok(report)
}
