//! Run command handlers
//!
//! Lists recent deployment runs and shows one run with its stage outcomes.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_core::domain::run::{DeploymentRun, RunStatus};
use keel_core::domain::stage::{StageOutcome, StageStatus};
use keel_core::dto::run::RunSummary;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List recent runs, newest first
    List {
        /// Maximum number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show a run with its stage outcomes
    Show {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::List { limit } => {
            let runs = client.list_runs(limit).await?;
            if runs.is_empty() {
                println!("{}", "No runs found.".yellow());
            } else {
                println!("{}", format!("Found {} run(s):", runs.len()).bold());
                println!();
                for run in &runs {
                    print_run_summary(run);
                }
            }
            Ok(())
        }
        RunCommands::Show { id } => {
            let uuid = resolve_run_id(&client, &IdOrPrefix::parse(&id)).await?;
            let run = client.get_run(uuid).await?;
            print_run_details(&run);
            Ok(())
        }
    }
}

fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Status:    {}", colorize_status(run.status));
    println!(
        "    Triggered: {}",
        run.triggered_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!("    Stages:    {}", run.stages_completed);
    if let (Some(stage), Some(kind)) = (run.failed_stage, run.failure_kind) {
        println!("    Failed at: {} ({})", stage.to_string().red(), kind);
    }
    println!();
}

fn print_run_details(run: &DeploymentRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Status:    {}", colorize_status(run.status));
    println!("  State:     {:?}", run.state);
    println!(
        "  Triggered: {}",
        run.triggered_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Started:   {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(finished) = run.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
        let duration = finished.signed_duration_since(run.started_at);
        println!("  Duration:  {}s", duration.num_seconds());
    }

    if !run.outcomes.is_empty() {
        println!("\n{}", "Stages:".bold());
        for outcome in &run.outcomes {
            print_outcome(outcome);
        }
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Failure:".bold());
        println!("  Kind:    {}", failure.kind.to_string().red());
        if let Some(stage) = failure.stage {
            println!("  Stage:   {}", stage);
        }
        println!("  Message: {}", failure.message.red());
    }
}

fn print_outcome(outcome: &StageOutcome) {
    let marker = match outcome.status {
        StageStatus::Succeeded => "✓".green(),
        StageStatus::Skipped => "-".dimmed(),
        StageStatus::Warned => "!".yellow(),
        StageStatus::Failed => "✗".red(),
    };
    let elapsed = outcome
        .finished_at
        .signed_duration_since(outcome.started_at)
        .num_milliseconds();

    println!(
        "  {} {:<20} {} {}",
        marker,
        outcome.stage.to_string(),
        outcome.detail,
        format!("({} ms)", elapsed).dimmed()
    );
    for warning in &outcome.warnings {
        println!("      {}", warning.yellow());
    }
}

/// Colorize run status for display
fn colorize_status(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Running => text.cyan(),
        RunStatus::Success => text.green(),
        RunStatus::Partial => text.yellow(),
        RunStatus::Failed => text.red(),
    }
}
