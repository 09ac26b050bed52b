//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod deploy;
mod plan;
mod runs;

pub use plan::PlanCommands;
pub use runs::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Trigger a deployment
    Deploy {
        /// File whose content is sent as the trigger payload
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Check orchestrator liveness
    Health,
    /// Check whether a deployment is in progress
    Status,
    /// Deployment run history
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Offline deployment plan tools
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Deploy { payload } => deploy::trigger(config, payload).await,
        Commands::Health => deploy::health(config).await,
        Commands::Status => deploy::status(config).await,
        Commands::Runs { command } => runs::handle_run_command(command, config).await,
        Commands::Plan { command } => plan::handle_plan_command(command),
    }
}
