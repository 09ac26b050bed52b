//! Build step
//!
//! Compiles the frontend into the static artifacts the proxy serves.

use keel_core::domain::plan::{DeploymentPlan, FrontendSpec};

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandSpec;

pub async fn build_frontend(
    ctx: &RunContext,
    plan: &DeploymentPlan,
    frontend: &FrontendSpec,
) -> Result<()> {
    let spec = CommandSpec::from_line(&frontend.build)?.cwd(plan.resolve(&frontend.dir));
    ctx.log_info(format!("Building frontend: {}", spec));

    let output = ctx
        .exec(&spec)
        .await
        .map_err(|e| PipelineError::BuildFailure(e.to_string()))?;

    if !output.success() {
        return Err(PipelineError::BuildFailure(format!(
            "`{}` failed ({})",
            spec,
            output.failure_summary()
        )));
    }

    let static_root = &plan.proxy.static_root;
    if !tokio::fs::try_exists(static_root).await.unwrap_or(false) {
        ctx.log_warning(format!(
            "Build finished but {} does not exist",
            static_root.display()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryLogSink;
    use crate::testing::{ScriptedRunner, sample_plan};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_build_runs_in_frontend_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = RunContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryLogSink::new()),
            runner.clone(),
            Duration::ZERO,
        );
        let frontend = plan.frontend.clone().unwrap();

        build_frontend(&ctx, &plan, &frontend).await.unwrap();

        assert_eq!(runner.calls(), vec!["npm run build"]);
    }

    #[tokio::test]
    async fn test_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let ctx = RunContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryLogSink::new()),
            Arc::new(ScriptedRunner::new().fail("npm run build")),
            Duration::ZERO,
        );
        let frontend = plan.frontend.clone().unwrap();

        let err = build_frontend(&ctx, &plan, &frontend).await.unwrap_err();

        assert!(matches!(err, PipelineError::BuildFailure(_)));
    }
}
