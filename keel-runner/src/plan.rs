//! Deployment plan loading and validation

use keel_core::domain::capability::CommandLine;
use keel_core::domain::plan::DeploymentPlan;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Reads and validates a YAML deployment plan
pub fn load_plan(path: &Path) -> Result<DeploymentPlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Plan(format!("failed to read {}: {}", path.display(), e)))?;
    parse_plan(&content)
}

pub fn parse_plan(content: &str) -> Result<DeploymentPlan> {
    let plan: DeploymentPlan =
        serde_yaml::from_str(content).map_err(|e| PipelineError::Plan(e.to_string()))?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Rejects plans the pipeline could not reconcile deterministically
pub fn validate_plan(plan: &DeploymentPlan) -> Result<()> {
    let invalid = |msg: String| Err(PipelineError::Plan(msg));

    if plan.name.trim().is_empty() {
        return invalid("plan name must not be empty".to_string());
    }

    let mut capabilities = HashSet::new();
    for capability in &plan.capabilities {
        if capability.name.trim().is_empty() {
            return invalid("capability name must not be empty".to_string());
        }
        if capability.probe.is_empty() {
            return invalid(format!("capability '{}' has no probe", capability.name));
        }
        if capability.install.is_empty() {
            return invalid(format!(
                "capability '{}' has no install procedure",
                capability.name
            ));
        }
        if capability.fallback.as_ref().is_some_and(CommandLine::is_empty) {
            return invalid(format!("capability '{}' has an empty fallback", capability.name));
        }
        if !capabilities.insert(capability.name.as_str()) {
            return invalid(format!("duplicate capability '{}'", capability.name));
        }
    }

    if let Some(frontend) = &plan.frontend {
        if frontend.install.is_empty() || frontend.build.is_empty() {
            return invalid("frontend install and build commands must not be empty".to_string());
        }
    }
    if plan.proxy.test_command.is_empty() || plan.proxy.reload_command.is_empty() {
        return invalid("proxy test and reload commands must not be empty".to_string());
    }

    let mut processes = HashSet::new();
    for process in &plan.processes {
        if process.name.trim().is_empty() {
            return invalid("process name must not be empty".to_string());
        }
        if !processes.insert(process.name.as_str()) {
            return invalid(format!("duplicate process '{}'", process.name));
        }
        if !process.cwd.is_absolute() {
            return invalid(format!("process '{}' cwd must be absolute", process.name));
        }
    }

    for (field, path) in [
        ("proxy.static_root", &plan.proxy.static_root),
        ("proxy.available_dir", &plan.proxy.available_dir),
        ("proxy.enabled_dir", &plan.proxy.enabled_dir),
    ] {
        if !path.is_absolute() {
            return invalid(format!("{} must be an absolute path", field));
        }
    }

    let mut prefixes = HashSet::new();
    for route in &plan.proxy.routes {
        if !route.prefix.starts_with('/') {
            return invalid(format!("route prefix '{}' must start with '/'", route.prefix));
        }
        if !prefixes.insert(route.prefix.as_str()) {
            return invalid(format!("duplicate route prefix '{}'", route.prefix));
        }
    }

    for (stage, required) in &plan.stage_requirements {
        for name in required {
            if !capabilities.contains(name.as_str()) {
                return invalid(format!(
                    "stage '{}' requires unknown capability '{}'",
                    stage.name(),
                    name
                ));
            }
        }
    }

    Ok(())
}
