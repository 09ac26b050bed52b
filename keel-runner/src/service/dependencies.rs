//! Dependency installer
//!
//! Backend: ensures the isolated environment exists, upgrades the package
//! installer and installs the declared manifest. Installation can partially
//! succeed without an error, so verification of the critical packages is a
//! separate step that inspects what actually got installed.
//!
//! Frontend: runs the plan's install command in the frontend directory.

use keel_core::domain::plan::{DeploymentPlan, FrontendSpec, RequiredPackage};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandSpec;

/// What the backend install did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInstall {
    pub venv: PathBuf,
    /// Whether the environment had to be created
    pub created_venv: bool,
}

fn pip(plan: &DeploymentPlan) -> String {
    plan.resolve(&plan.backend.venv)
        .join("bin/pip")
        .to_string_lossy()
        .to_string()
}

/// Installs backend dependencies into the isolated environment
pub async fn install_backend(ctx: &RunContext, plan: &DeploymentPlan) -> Result<BackendInstall> {
    let venv = plan.resolve(&plan.backend.venv);
    let interpreter = venv.join("bin/python");
    let repo = &plan.repository.path;

    let created_venv = if tokio::fs::try_exists(&interpreter).await.unwrap_or(false) {
        ctx.log_debug(format!("Environment {} already exists", venv.display()));
        false
    } else {
        ctx.log_info(format!("Creating environment {}", venv.display()));
        let create = CommandSpec::new(&plan.backend.python)
            .args(["-m", "venv"])
            .arg(venv.to_string_lossy())
            .cwd(repo);
        run_install_step(ctx, &create).await?;
        true
    };

    let pip = pip(plan);
    let requirements = plan.resolve(&plan.backend.requirements);

    // Hard ordering: the environment must exist before pip runs inside it
    run_install_step(
        ctx,
        &CommandSpec::new(&pip)
            .args(["install", "--upgrade", "pip"])
            .cwd(repo),
    )
    .await?;
    run_install_step(
        ctx,
        &CommandSpec::new(&pip)
            .args(["install", "-r"])
            .arg(requirements.to_string_lossy())
            .cwd(repo),
    )
    .await?;

    Ok(BackendInstall { venv, created_venv })
}

/// Confirms every required package is installed (at its pinned version)
///
/// Returns the names that were checked.
pub async fn verify_packages(ctx: &RunContext, plan: &DeploymentPlan) -> Result<Vec<String>> {
    let list = CommandSpec::new(pip(plan))
        .args(["list", "--format=freeze"])
        .cwd(&plan.repository.path);
    let output = ctx.exec(&list).await?;
    if !output.success() {
        return Err(PipelineError::InstallFailure(format!(
            "could not list installed packages ({})",
            output.failure_summary()
        )));
    }

    let installed = parse_freeze(&output.stdout);
    let missing = missing_packages(&plan.backend.required_packages, &installed);
    if !missing.is_empty() {
        return Err(PipelineError::VerificationMismatch { missing });
    }

    Ok(plan
        .backend
        .required_packages
        .iter()
        .map(|p| p.name.clone())
        .collect())
}

/// Installs frontend dependencies
pub async fn install_frontend(
    ctx: &RunContext,
    plan: &DeploymentPlan,
    frontend: &FrontendSpec,
) -> Result<()> {
    let spec = CommandSpec::from_line(&frontend.install)?.cwd(plan.resolve(&frontend.dir));
    run_install_step(ctx, &spec).await
}

async fn run_install_step(ctx: &RunContext, spec: &CommandSpec) -> Result<()> {
    let output = ctx
        .exec(spec)
        .await
        .map_err(|e| PipelineError::InstallFailure(e.to_string()))?;

    if !output.success() {
        return Err(PipelineError::InstallFailure(format!(
            "`{}` failed ({})",
            spec,
            output.failure_summary()
        )));
    }
    Ok(())
}

/// Normalizes a package name so `Flask`, `flask` and `FLASK` compare equal,
/// as do `typing_extensions` and `typing-extensions`
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['_', '.'], "-")
}

/// Parses `pip list --format=freeze` output into normalized name -> version
pub fn parse_freeze(output: &str) -> HashMap<String, Option<String>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(|line| {
            if let Some((name, version)) = line.split_once("==") {
                (normalize_name(name), Some(version.trim().to_string()))
            } else if let Some((name, _)) = line.split_once(" @ ") {
                (normalize_name(name), None)
            } else {
                (normalize_name(line), None)
            }
        })
        .collect()
}

/// Required packages absent from (or mismatched in) the installed set
pub fn missing_packages(
    required: &[RequiredPackage],
    installed: &HashMap<String, Option<String>>,
) -> Vec<String> {
    required
        .iter()
        .filter_map(|package| {
            let found = installed.get(&normalize_name(&package.name));
            match (found, &package.version) {
                (None, _) => Some(package.name.clone()),
                (Some(Some(have)), Some(want)) if have != want => {
                    Some(format!("{}=={} (found {})", package.name, want, have))
                }
                (Some(None), Some(want)) => {
                    Some(format!("{}=={} (found unversioned)", package.name, want))
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryLogSink;
    use crate::testing::{ScriptedRunner, sample_plan};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn context(runner: Arc<ScriptedRunner>) -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryLogSink::new()),
            runner,
            Duration::ZERO,
        )
    }

    #[test]
    fn test_parse_freeze() {
        let installed = parse_freeze(
            "Flask==3.0.0\n\
             pymongo==4.6.1\n\
             typing_extensions==4.9.0\n\
             mypkg @ file:///tmp/mypkg\n\
             -e git+https://example.com/repo.git#egg=editable\n",
        );

        assert_eq!(installed.get("flask"), Some(&Some("3.0.0".to_string())));
        assert_eq!(
            installed.get("typing-extensions"),
            Some(&Some("4.9.0".to_string()))
        );
        assert_eq!(installed.get("mypkg"), Some(&None));
        assert_eq!(installed.len(), 4);
    }

    #[test]
    fn test_missing_packages_checks_names_and_pins() {
        let installed = parse_freeze("Flask==3.0.0\nredis==4.0.0\n");
        let required = vec![
            RequiredPackage::new("flask"),
            RequiredPackage::new("pymongo"),
            RequiredPackage::pinned("redis", "5.0.1"),
        ];

        let missing = missing_packages(&required, &installed);

        assert_eq!(
            missing,
            vec![
                "pymongo".to_string(),
                "redis==5.0.1 (found 4.0.0)".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_install_backend_creates_environment_then_installs() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(runner.clone());

        let result = install_backend(&ctx, &plan).await.unwrap();

        assert!(result.created_venv);
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("python3 -m venv"));
        assert!(calls[1].ends_with("bin/pip install --upgrade pip"));
        assert!(calls[2].ends_with("backend/requirements.txt"));
    }

    #[tokio::test]
    async fn test_install_backend_reuses_existing_environment() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let bin = plan.resolve(&plan.backend.venv).join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), "").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(runner.clone());

        let result = install_backend(&ctx, &plan).await.unwrap();

        assert!(!result.created_venv);
        assert!(!runner.called("-m venv"));
        assert_eq!(runner.count("bin/pip install"), 2);
    }

    #[tokio::test]
    async fn test_install_failure_stops_before_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner = Arc::new(ScriptedRunner::new().fail("install --upgrade pip"));
        let ctx = context(runner.clone());

        let err = install_backend(&ctx, &plan).await.unwrap_err();

        assert!(matches!(err, PipelineError::InstallFailure(_)));
        assert!(!runner.called("install -r"));
    }

    #[tokio::test]
    async fn test_verify_packages_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner =
            Arc::new(ScriptedRunner::new().stdout("pip list", "Flask==3.0.0\nredis==5.0.1\n"));
        let ctx = context(runner);

        let err = verify_packages(&ctx, &plan).await.unwrap_err();

        match err {
            PipelineError::VerificationMismatch { missing } => {
                assert_eq!(missing, vec!["pymongo".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_packages_accepts_complete_set() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let ctx = context(Arc::new(ScriptedRunner::healthy()));

        let checked = verify_packages(&ctx, &plan).await.unwrap();

        assert_eq!(checked, vec!["flask", "pymongo", "redis"]);
    }
}
