//! Plan command handlers
//!
//! Offline tools: validate a deployment plan and render the files a run
//! would write, without touching the host.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_core::domain::plan::DeploymentPlan;
use keel_core::domain::stage::StageKind;
use keel_runner::plan::load_plan;
use keel_runner::service::{proxy, supervisor};
use std::path::{Path, PathBuf};

/// Plan subcommands
#[derive(Subcommand)]
pub enum PlanCommands {
    /// Validate a plan file
    Validate {
        /// Path to the plan file
        file: PathBuf,
    },
    /// Print the process manifest the plan produces
    Manifest {
        /// Path to the plan file
        file: PathBuf,
    },
    /// Print the proxy configuration the plan produces
    Proxy {
        /// Path to the plan file
        file: PathBuf,
    },
    /// List routes in evaluation order
    Routes {
        /// Path to the plan file
        file: PathBuf,

        /// Show which route a request path resolves to
        #[arg(long)]
        resolve: Option<String>,
    },
}

pub fn handle_plan_command(command: PlanCommands) -> Result<()> {
    match command {
        PlanCommands::Validate { file } => validate(&file),
        PlanCommands::Manifest { file } => {
            let plan = load(&file)?;
            println!("{}", supervisor::render_manifest(&plan.processes)?);
            Ok(())
        }
        PlanCommands::Proxy { file } => {
            let plan = load(&file)?;
            print!("{}", proxy::render_config(&plan.proxy));
            Ok(())
        }
        PlanCommands::Routes { file, resolve } => routes(&file, resolve.as_deref()),
    }
}

fn load(file: &Path) -> Result<DeploymentPlan> {
    load_plan(file).with_context(|| format!("Invalid plan {}", file.display()))
}

fn validate(file: &Path) -> Result<()> {
    let plan = load(file)?;

    println!("{} Plan '{}' is valid", "✓".green(), plan.name.bold());
    println!("  Capabilities: {}", plan.capabilities.len());
    println!("  Processes:    {}", plan.processes.len());
    println!("  Routes:       {}", plan.proxy.routes.len());
    println!(
        "  Frontend:     {}",
        if plan.frontend.is_some() { "yes" } else { "no" }
    );

    println!("\n{}", "Stages:".bold());
    for stage in StageKind::ORDER {
        let required = plan.requirements(stage);
        if required.is_empty() {
            println!("  {}", stage);
        } else {
            println!("  {} {}", stage, format!("(requires {})", required.join(", ")).dimmed());
        }
    }

    Ok(())
}

fn routes(file: &Path, resolve: Option<&str>) -> Result<()> {
    let plan = load(file)?;
    let table = plan.route_table();

    match resolve {
        Some(path) => match table.resolve(path) {
            Some(rule) => println!("{} -> {} ({})", path, rule.upstream().cyan(), rule.prefix),
            None => println!("{} -> {}", path, "static files".dimmed()),
        },
        None => {
            for (i, rule) in table.rules().iter().enumerate() {
                println!("  {:>2}. {:<28} {}", i + 1, rule.prefix, rule.upstream().cyan());
            }
            println!("  {:>2}. {:<28} {}", table.len() + 1, "/", "static files".dimmed());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name: webapp
repository:
  path: /srv/webapp
backend:
  required_packages:
    - name: flask
proxy:
  site: webapp
  static_root: /srv/webapp/frontend/dist
  routes:
    - prefix: /api/
      port: 5000
    - prefix: /api/templates
      port: 5001
stage_requirements: {}
"#;

    #[test]
    fn test_plan_commands_accept_valid_plan() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keel.yaml");
        std::fs::write(&file, PLAN).unwrap();

        assert!(handle_plan_command(PlanCommands::Validate { file: file.clone() }).is_ok());
        assert!(handle_plan_command(PlanCommands::Proxy { file: file.clone() }).is_ok());
        assert!(handle_plan_command(PlanCommands::Routes {
            file,
            resolve: Some("/api/templates/x".to_string()),
        })
        .is_ok());
    }

    #[test]
    fn test_invalid_plan_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keel.yaml");
        std::fs::write(&file, PLAN.replace("prefix: /api/templates", "prefix: /api/")).unwrap();

        let err = handle_plan_command(PlanCommands::Validate { file }).unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate route prefix"));
    }
}
