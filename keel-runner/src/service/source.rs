//! Source synchronizer
//!
//! Resets the working copy to the canonical upstream revision. The reset is
//! destructive: uncommitted local changes are discarded.

use keel_core::domain::plan::RepositorySpec;

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandSpec;

/// Steps executed against the working copy, in order
pub fn sync_commands(repo: &RepositorySpec) -> Vec<CommandSpec> {
    let upstream = format!("{}/{}", repo.remote, repo.branch);
    let git = || CommandSpec::new("git").cwd(&repo.path);

    vec![
        git().args(["checkout", "--", "."]),
        git().args(["fetch", repo.remote.as_str(), repo.branch.as_str()]),
        git().args(["reset", "--hard", upstream.as_str()]),
        git().args(["pull", repo.remote.as_str(), repo.branch.as_str()]),
    ]
}

/// Force-syncs the working copy; any failing step aborts
pub async fn sync(ctx: &RunContext, repo: &RepositorySpec) -> Result<()> {
    ctx.log_info(format!(
        "Syncing {} to {}/{}",
        repo.path.display(),
        repo.remote,
        repo.branch
    ));

    ensure_trusted(ctx, repo).await?;
    for step in sync_commands(repo) {
        run_step(ctx, &step).await?;
    }

    Ok(())
}

/// Registers the working copy as a git safe.directory unless it already is
///
/// The deploy user rarely owns the checkout; without the entry git refuses
/// to operate on it.
async fn ensure_trusted(ctx: &RunContext, repo: &RepositorySpec) -> Result<()> {
    let path = repo.path.to_string_lossy().to_string();
    let query =
        CommandSpec::new("git").args(["config", "--global", "--get-all", "safe.directory"]);
    let listed = ctx
        .exec(&query)
        .await
        .map_err(|e| PipelineError::SyncFailure(e.to_string()))?;

    // Exit status 1 only means the key is not set yet
    if listed.success() && listed.stdout.lines().any(|line| line.trim() == path) {
        ctx.log_debug(format!("{} is already a safe.directory", path));
        return Ok(());
    }

    let add = CommandSpec::new("git").args([
        "config",
        "--global",
        "--add",
        "safe.directory",
        path.as_str(),
    ]);
    run_step(ctx, &add).await
}

async fn run_step(ctx: &RunContext, step: &CommandSpec) -> Result<()> {
    let output = ctx
        .exec(step)
        .await
        .map_err(|e| PipelineError::SyncFailure(e.to_string()))?;

    if !output.success() {
        return Err(PipelineError::SyncFailure(format!(
            "`{}` failed ({})",
            step,
            output.failure_summary()
        )));
    }
    Ok(())
}
