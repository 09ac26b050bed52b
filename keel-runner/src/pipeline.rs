//! Pipeline controller
//!
//! Drives one deployment run through the fixed stage order. Each stage runs
//! to completion before the next begins. A failing `abort-on-failure` stage
//! ends the run; a failing `warn-and-continue` stage is logged and the run
//! moves on. The whole run is bounded by the configured timeout.

use chrono::{DateTime, Utc};
use keel_core::domain::plan::DeploymentPlan;
use keel_core::domain::run::{DeploymentRun, FailureKind, RunStatus, TriggerEvent};
use keel_core::domain::stage::{AbortPolicy, StageKind, StageOutcome, StageStatus};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandRunner;
use crate::service::{
    LogSink, build_service, capability_service, dependency_service, proxy_service,
    source_service, supervisor_service, verifier_service,
};

/// Callback invoked whenever the run record changes
pub type RunObserver<'a> = &'a (dyn Fn(&DeploymentRun) + Send + Sync);

/// How a stage that did not fail ended
#[derive(Debug)]
enum StageReport {
    Succeeded(String),
    Skipped(String),
    Warned(String, Vec<String>),
}

/// Facts carried between stages of one run
#[derive(Default)]
struct RunState {
    unavailable: HashSet<String>,
    failed_processes: Vec<String>,
    stage_started_at: Option<DateTime<Utc>>,
}

/// Sequences the stages of a deployment
pub struct PipelineController {
    plan: Arc<DeploymentPlan>,
    config: RunnerConfig,
    runner: Arc<dyn CommandRunner>,
    sink: Arc<dyn LogSink>,
}

impl PipelineController {
    pub fn new(
        plan: Arc<DeploymentPlan>,
        config: RunnerConfig,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            plan,
            config,
            runner,
            sink,
        }
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Executes one run to a terminal status
    pub async fn run(&self, run_id: Uuid, event: &TriggerEvent) -> DeploymentRun {
        self.run_observed(run_id, event, &|_| {}).await
    }

    /// Executes one run, reporting every state change to `observer`
    pub async fn run_observed(
        &self,
        run_id: Uuid,
        event: &TriggerEvent,
        observer: RunObserver<'_>,
    ) -> DeploymentRun {
        let ctx = RunContext::new(
            run_id,
            self.sink.clone(),
            self.runner.clone(),
            self.config.settle_interval,
        );
        let mut run = DeploymentRun::new(run_id, event);
        let mut state = RunState::default();

        ctx.log_info(format!(
            "Deployment {} started for '{}' (payload {} bytes)",
            run_id,
            self.plan.name,
            event.payload.len()
        ));
        observer(&run);

        let bound = self.config.run_timeout;
        let timed = tokio::time::timeout(bound, self.execute(&ctx, &mut run, &mut state, observer));
        if timed.await.is_err() {
            // Dropping the stage future killed any running child
            let err = PipelineError::Timeout(bound);
            ctx.log_error(err.to_string());
            if let Some(stage) = run.current_stage {
                let started_at = state.stage_started_at.unwrap_or(run.started_at);
                run.record(outcome(
                    stage,
                    StageStatus::Failed,
                    err.to_string(),
                    Vec::new(),
                    started_at,
                ));
            }
            run.fail(run.current_stage, FailureKind::Timeout, err.to_string());
        }

        let status = run.finish();
        match (status, &run.failure) {
            (RunStatus::Failed, Some(failure)) => ctx.log_error(format!(
                "Deployment {} failed at {}: {} ({})",
                run_id,
                failure.stage.map(|s| s.name()).unwrap_or("startup"),
                failure.message,
                failure.kind
            )),
            _ => ctx.log_info(format!("Deployment {} finished: {}", run_id, status)),
        }
        observer(&run);

        run
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        run: &mut DeploymentRun,
        state: &mut RunState,
        observer: RunObserver<'_>,
    ) {
        for stage in StageKind::ORDER {
            run.enter(stage);
            observer(run);

            let started_at = Utc::now();
            state.stage_started_at = Some(started_at);
            ctx.log_info(format!("Stage {} started", stage));

            let result = match self.precondition(stage) {
                Some(reason) => Ok(StageReport::Skipped(reason)),
                None => match self.check_requirements(stage, state) {
                    Ok(()) => self.run_stage(stage, ctx, state).await,
                    Err(e) => Err(e),
                },
            };

            let recorded = match result {
                Ok(StageReport::Succeeded(detail)) => {
                    ctx.log_info(format!("Stage {} succeeded: {}", stage, detail));
                    outcome(stage, StageStatus::Succeeded, detail, Vec::new(), started_at)
                }
                Ok(StageReport::Skipped(detail)) => {
                    ctx.log_info(format!("Stage {} skipped: {}", stage, detail));
                    outcome(stage, StageStatus::Skipped, detail, Vec::new(), started_at)
                }
                Ok(StageReport::Warned(detail, warnings)) => {
                    ctx.log_warning(format!(
                        "Stage {} finished with {} warning(s): {}",
                        stage,
                        warnings.len(),
                        detail
                    ));
                    outcome(stage, StageStatus::Warned, detail, warnings, started_at)
                }
                Err(err) => match stage.policy() {
                    AbortPolicy::WarnAndContinue => {
                        ctx.log_warning(format!("Stage {} failed, continuing: {}", stage, err));
                        let detail = err.to_string();
                        let warnings = vec![detail.clone()];
                        outcome(stage, StageStatus::Warned, detail, warnings, started_at)
                    }
                    AbortPolicy::AbortOnFailure => {
                        ctx.log_error(format!("Stage {} failed: {}", stage, err));
                        let detail = err.to_string();
                        run.record(outcome(
                            stage,
                            StageStatus::Failed,
                            detail.clone(),
                            Vec::new(),
                            started_at,
                        ));
                        run.fail(Some(stage), err.kind(), detail);
                        observer(run);
                        return;
                    }
                },
            };

            run.record(recorded);
            observer(run);
        }
    }

    /// Reason a stage has nothing to do, if any
    fn precondition(&self, stage: StageKind) -> Option<String> {
        match stage {
            StageKind::VerifyPackages if self.plan.backend.required_packages.is_empty() => {
                Some("no required packages declared".to_string())
            }
            StageKind::InstallFrontend | StageKind::BuildFrontend
                if self.plan.frontend.is_none() =>
            {
                Some("no frontend configured".to_string())
            }
            _ => None,
        }
    }

    /// Fails when a capability the stage hard-depends on is unavailable
    fn check_requirements(&self, stage: StageKind, state: &RunState) -> Result<()> {
        match self
            .plan
            .requirements(stage)
            .iter()
            .find(|name| state.unavailable.contains(name.as_str()))
        {
            Some(name) => Err(PipelineError::CapabilityUnavailable(name.clone())),
            None => Ok(()),
        }
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        ctx: &RunContext,
        state: &mut RunState,
    ) -> Result<StageReport> {
        let plan = self.plan.as_ref();

        match stage {
            StageKind::Provision => {
                let summary = capability_service::provision_all(ctx, &plan.capabilities).await;
                let unavailable = summary.unavailable();
                state.unavailable = unavailable.iter().cloned().collect();

                if summary.already_satisfied() {
                    return Ok(StageReport::Skipped(format!(
                        "all {} capabilities present and running",
                        summary.reports.len()
                    )));
                }

                let detail = format!(
                    "installed [{}], started [{}]",
                    summary.installed().join(", "),
                    summary.started().join(", ")
                );
                if unavailable.is_empty() {
                    Ok(StageReport::Succeeded(detail))
                } else {
                    let warnings = unavailable
                        .into_iter()
                        .map(|name| PipelineError::CapabilityUnavailable(name).to_string())
                        .collect();
                    Ok(StageReport::Warned(detail, warnings))
                }
            }
            StageKind::SyncSource => {
                source_service::sync(ctx, &plan.repository).await?;
                Ok(StageReport::Succeeded(format!(
                    "reset to {}/{}",
                    plan.repository.remote, plan.repository.branch
                )))
            }
            StageKind::InstallBackend => {
                let install = dependency_service::install_backend(ctx, plan).await?;
                Ok(StageReport::Succeeded(if install.created_venv {
                    format!("created {} and installed dependencies", install.venv.display())
                } else {
                    "installed dependencies".to_string()
                }))
            }
            StageKind::VerifyPackages => {
                let checked = dependency_service::verify_packages(ctx, plan).await?;
                Ok(StageReport::Succeeded(format!("found {}", checked.join(", "))))
            }
            StageKind::InstallFrontend => {
                let Some(frontend) = &plan.frontend else {
                    return Ok(StageReport::Skipped("no frontend configured".to_string()));
                };
                dependency_service::install_frontend(ctx, plan, frontend).await?;
                Ok(StageReport::Succeeded("frontend dependencies installed".to_string()))
            }
            StageKind::BuildFrontend => {
                let Some(frontend) = &plan.frontend else {
                    return Ok(StageReport::Skipped("no frontend configured".to_string()));
                };
                build_service::build_frontend(ctx, plan, frontend).await?;
                Ok(StageReport::Succeeded("frontend built".to_string()))
            }
            StageKind::ReconcileProcesses => {
                let report = supervisor_service::reconcile(ctx, plan).await?;
                state.failed_processes = report.failed.clone();

                let detail = format!(
                    "started {}/{} processes",
                    report.started.len(),
                    plan.processes.len()
                );
                if report.warnings.is_empty() {
                    Ok(StageReport::Succeeded(detail))
                } else {
                    Ok(StageReport::Warned(detail, report.warnings))
                }
            }
            StageKind::ConfigureProxy => {
                let activation = proxy_service::configure(ctx, &plan.proxy).await?;
                Ok(StageReport::Succeeded(format!(
                    "activated {} with {} routes",
                    activation.config.display(),
                    activation.routes
                )))
            }
            StageKind::VerifyDeployment => {
                let report =
                    verifier_service::verify(ctx, &plan.verify, &state.failed_processes).await;
                let detail = format!(
                    "{} ports bound, {} endpoints reachable",
                    report.bound_ports.len(),
                    report.reachable.len()
                );
                if report.warnings.is_empty() {
                    Ok(StageReport::Succeeded(detail))
                } else {
                    Ok(StageReport::Warned(detail, report.warnings))
                }
            }
        }
    }
}

fn outcome(
    stage: StageKind,
    status: StageStatus,
    detail: String,
    warnings: Vec<String>,
    started_at: DateTime<Utc>,
) -> StageOutcome {
    StageOutcome {
        stage,
        state: stage.state(),
        status,
        detail,
        warnings,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryLogSink;
    use crate::service::proxy::render_config;
    use crate::testing::{ScriptedRunner, sample_plan};
    use keel_core::domain::capability::CommandLine;
    use keel_core::domain::stage::PipelineState;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Harness {
        _dir: tempfile::TempDir,
        controller: PipelineController,
        runner: Arc<ScriptedRunner>,
        sink: MemoryLogSink,
        plan: Arc<DeploymentPlan>,
    }

    fn harness_with(
        runner: ScriptedRunner,
        configure: impl FnOnce(&mut DeploymentPlan),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = sample_plan(dir.path());
        configure(&mut plan);
        let plan = Arc::new(plan);

        let config = RunnerConfig::new(dir.path().join("keel.yaml"), dir.path().join("logs"))
            .with_settle_interval(Duration::ZERO);
        let runner = Arc::new(runner);
        let sink = MemoryLogSink::new();
        let controller =
            PipelineController::new(plan.clone(), config, runner.clone(), Arc::new(sink.clone()));

        Harness {
            _dir: dir,
            controller,
            runner,
            sink,
            plan,
        }
    }

    fn harness(runner: ScriptedRunner) -> Harness {
        harness_with(runner, |_| {})
    }

    fn statuses(run: &DeploymentRun) -> Vec<(StageKind, StageStatus)> {
        run.outcomes.iter().map(|o| (o.stage, o.status)).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let mut listeners = Vec::new();
        for _ in 0..3 {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let ports: Vec<u16> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect();

        let h = harness_with(ScriptedRunner::healthy(), |plan| {
            plan.verify.ports = ports.clone();
        });

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("{}")).await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.state, PipelineState::Terminal);
        assert!(run.failure.is_none());
        assert_eq!(run.outcomes.len(), 9);
        assert_eq!(
            run.outcome(StageKind::Provision).unwrap().status,
            StageStatus::Skipped
        );
        for stage in &StageKind::ORDER[1..] {
            assert_eq!(run.outcome(*stage).unwrap().status, StageStatus::Succeeded);
        }

        // Stages ran in declaration order
        let order: Vec<StageKind> = run.outcomes.iter().map(|o| o.stage).collect();
        assert_eq!(order, StageKind::ORDER.to_vec());

        assert_eq!(h.runner.count("--only"), 5);
        assert!(!h.runner.called("apt-get"));

        let manifest_path = h.plan.resolve(&h.plan.supervisor.manifest);
        let manifest = std::fs::read_to_string(manifest_path).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["apps"].as_array().unwrap().len(), 5);

        let config =
            std::fs::read_to_string(h.plan.proxy.available_dir.join(&h.plan.proxy.site)).unwrap();
        assert_eq!(config.matches("proxy_pass").count(), 9);
        let templates = config.find("location /api/templates {").unwrap();
        let general = config.find("location /api/ {").unwrap();
        assert!(templates < general);

        assert!(run
            .outcome(StageKind::VerifyDeployment)
            .unwrap()
            .detail
            .starts_with("3 ports bound"));
        assert!(h.sink.contains("finished: success"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        // The cache engine is missing before the first run only
        let h = harness(ScriptedRunner::healthy().fail_times("command -v redis-server", 1));

        let first = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;
        let manifest_path = h.plan.resolve(&h.plan.supervisor.manifest);
        let proxy_path = h.plan.proxy.available_dir.join(&h.plan.proxy.site);
        let first_manifest = std::fs::read_to_string(&manifest_path).unwrap();
        let first_proxy = std::fs::read_to_string(&proxy_path).unwrap();
        let installs_after_first = h.runner.count("apt-get");

        let second = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(
            first.outcome(StageKind::Provision).unwrap().status,
            StageStatus::Succeeded
        );
        assert_eq!(installs_after_first, 1);

        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(
            second.outcome(StageKind::Provision).unwrap().status,
            StageStatus::Skipped
        );
        assert_eq!(h.runner.count("apt-get"), installs_after_first);
        assert_eq!(std::fs::read_to_string(&manifest_path).unwrap(), first_manifest);
        assert_eq!(std::fs::read_to_string(&proxy_path).unwrap(), first_proxy);
        assert_eq!(first_proxy, render_config(&h.plan.proxy));
    }

    #[tokio::test]
    async fn test_missing_package_stops_the_run() {
        let h = harness(ScriptedRunner::new().stdout("pip list", "Flask==3.0.0\nredis==5.0.1\n"));

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_stage(), Some(StageKind::VerifyPackages));
        assert_eq!(
            run.failure.as_ref().unwrap().kind,
            FailureKind::VerificationMismatch
        );
        assert!(run.failure.as_ref().unwrap().message.contains("pymongo"));

        assert!(run.outcome(StageKind::BuildFrontend).is_none());
        assert!(run.outcome(StageKind::ReconcileProcesses).is_none());
        assert!(run.outcome(StageKind::ConfigureProxy).is_none());
        assert!(!h.runner.called("npm run build"));
        assert!(!h.runner.called("pm2"));
        assert!(!h.runner.called("nginx -t"));
        assert!(h.sink.contains("failed at verify-packages"));
    }

    #[tokio::test]
    async fn test_hanging_stage_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let plan = Arc::new(sample_plan(dir.path()));
        let config = RunnerConfig::new(dir.path().join("keel.yaml"), dir.path().join("logs"))
            .with_settle_interval(Duration::ZERO)
            .with_run_timeout(Duration::from_millis(200));
        let runner =
            Arc::new(ScriptedRunner::healthy().delay("git fetch", Duration::from_secs(10)));
        let controller =
            PipelineController::new(plan, config, runner.clone(), Arc::new(MemoryLogSink::new()));

        let started = tokio::time::Instant::now();
        let run = controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure.as_ref().unwrap().kind, FailureKind::Timeout);
        assert_eq!(run.failed_stage(), Some(StageKind::SyncSource));
        assert_eq!(
            run.outcome(StageKind::SyncSource).unwrap().status,
            StageStatus::Failed
        );
        assert!(!runner.called("pip install"));
    }

    #[tokio::test]
    async fn test_unavailable_required_capability_aborts_dependent_stage() {
        let h = harness(
            ScriptedRunner::healthy()
                .fail("command -v git")
                .fail("install -y git"),
        );

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            statuses(&run),
            vec![
                (StageKind::Provision, StageStatus::Warned),
                (StageKind::SyncSource, StageStatus::Failed),
            ]
        );
        assert_eq!(
            run.failure.as_ref().unwrap().kind,
            FailureKind::CapabilityUnavailable
        );
        assert!(!h.runner.called("git fetch"));
    }

    #[tokio::test]
    async fn test_malformed_install_procedure_still_aborts_dependent_stage() {
        let h = harness_with(ScriptedRunner::healthy().fail("command -v git"), |plan| {
            plan.capabilities[0].install = CommandLine::new(Vec::<String>::new());
        });

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(
            statuses(&run),
            vec![
                (StageKind::Provision, StageStatus::Warned),
                (StageKind::SyncSource, StageStatus::Failed),
            ]
        );
        assert_eq!(
            run.failure.as_ref().unwrap().kind,
            FailureKind::CapabilityUnavailable
        );
        // Capabilities declared after the broken one were still probed
        assert!(h.runner.called("command -v redis-server"));
        assert!(h.runner.called("command -v ufw"));
        assert!(!h.runner.called("git fetch"));
    }

    #[tokio::test]
    async fn test_unrequired_capability_only_warns() {
        let h = harness(
            ScriptedRunner::healthy()
                .fail("command -v ufw")
                .fail("install -y ufw"),
        );

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.outcomes.len(), 9);
        let provision = run.outcome(StageKind::Provision).unwrap();
        assert_eq!(provision.status, StageStatus::Warned);
        assert_eq!(provision.warnings, vec!["capability 'firewall' is unavailable"]);
    }

    #[tokio::test]
    async fn test_process_start_failure_surfaces_in_verification() {
        let h = harness(ScriptedRunner::healthy().fail("--only worker"));

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(
            run.outcome(StageKind::ReconcileProcesses).unwrap().status,
            StageStatus::Succeeded
        );
        let verify = run.outcome(StageKind::VerifyDeployment).unwrap();
        assert_eq!(verify.status, StageStatus::Warned);
        assert!(verify.warnings[0].contains("worker"));
    }

    #[tokio::test]
    async fn test_proxy_reload_failure_aborts() {
        let h = harness(ScriptedRunner::healthy().fail("systemctl reload nginx"));

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_stage(), Some(StageKind::ConfigureProxy));
        assert!(run.outcome(StageKind::VerifyDeployment).is_none());
    }

    #[tokio::test]
    async fn test_frontend_stages_skip_without_frontend() {
        let h = harness_with(ScriptedRunner::healthy(), |plan| plan.frontend = None);

        let run = h.controller.run(Uuid::new_v4(), &TriggerEvent::new("")).await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(
            run.outcome(StageKind::InstallFrontend).unwrap().status,
            StageStatus::Skipped
        );
        assert_eq!(
            run.outcome(StageKind::BuildFrontend).unwrap().status,
            StageStatus::Skipped
        );
        assert!(!h.runner.called("npm"));
    }

    #[tokio::test]
    async fn test_observer_sees_progress() {
        let h = harness(ScriptedRunner::healthy());
        let seen = std::sync::Mutex::new(Vec::new());

        let run = h
            .controller
            .run_observed(Uuid::new_v4(), &TriggerEvent::new(""), &|run: &DeploymentRun| {
                seen.lock().unwrap().push(run.state);
            })
            .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&PipelineState::Idle));
        assert!(seen.contains(&PipelineState::Building));
        assert_eq!(seen.last(), Some(&PipelineState::Terminal));
        assert_eq!(run.status, RunStatus::Success);
    }
}
