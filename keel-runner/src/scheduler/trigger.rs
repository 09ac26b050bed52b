//! Trigger scheduling
//!
//! A single-permit semaphore serializes deployment runs. A trigger that
//! arrives while a run is active is either deferred or rejected, depending on
//! the configured policy. Deferred triggers wait in arrival order and each
//! one gets a run of its own.

use keel_core::domain::run::{DeploymentRun, TriggerEvent};
use keel_core::dto::trigger::{SubmissionStatus, TriggerAck};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::TriggerPolicy;
use crate::pipeline::PipelineController;
use crate::scheduler::history::RunHistory;

/// How a trigger was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub status: SubmissionStatus,
    pub run_id: Option<Uuid>,
}

impl Submission {
    pub fn ack(&self) -> TriggerAck {
        let message = match self.status {
            SubmissionStatus::Started => "deployment started",
            SubmissionStatus::Queued => "deployment queued behind the active run",
            SubmissionStatus::Rejected => "deployment in progress",
        };
        TriggerAck {
            status: self.status,
            run_id: self.run_id,
            message: message.to_string(),
        }
    }
}

struct Pending {
    run_id: Uuid,
    event: TriggerEvent,
}

struct Inner {
    controller: Arc<PipelineController>,
    policy: TriggerPolicy,
    permit: Arc<Semaphore>,
    pending: Mutex<VecDeque<Pending>>,
    history: Mutex<RunHistory>,
}

impl Inner {
    fn remember(&self, run: &DeploymentRun) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(run.clone());
    }
}

/// Accepts triggers and runs the pipeline in the background
#[derive(Clone)]
pub struct RunScheduler {
    inner: Arc<Inner>,
}

impl RunScheduler {
    pub fn new(
        controller: Arc<PipelineController>,
        policy: TriggerPolicy,
        history_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller,
                policy,
                permit: Arc::new(Semaphore::new(1)),
                pending: Mutex::new(VecDeque::new()),
                history: Mutex::new(RunHistory::new(history_size)),
            }),
        }
    }

    /// Schedules a run for the trigger without waiting for it
    pub fn submit(&self, event: TriggerEvent) -> Submission {
        // The pending queue is locked while the permit is tried, so a run
        // finishing concurrently cannot miss a newly deferred trigger.
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Ok(permit) = self.inner.permit.clone().try_acquire_owned() {
            let run_id = Uuid::new_v4();
            info!("Starting deployment {}", run_id);
            self.inner.remember(&DeploymentRun::new(run_id, &event));
            self.spawn(permit, run_id, event);
            return Submission {
                status: SubmissionStatus::Started,
                run_id: Some(run_id),
            };
        }

        match self.inner.policy {
            TriggerPolicy::Reject => {
                warn!("Rejecting trigger: deployment in progress");
                Submission {
                    status: SubmissionStatus::Rejected,
                    run_id: None,
                }
            }
            TriggerPolicy::Queue => {
                let run_id = Uuid::new_v4();
                info!(
                    "Queueing deployment {} behind the active run ({} waiting)",
                    run_id,
                    pending.len()
                );
                pending.push_back(Pending { run_id, event });
                Submission {
                    status: SubmissionStatus::Queued,
                    run_id: Some(run_id),
                }
            }
        }
    }

    fn spawn(&self, permit: OwnedSemaphorePermit, run_id: Uuid, event: TriggerEvent) {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut next = Pending { run_id, event };
            loop {
                let observer = |run: &DeploymentRun| inner.remember(run);
                let run = inner
                    .controller
                    .run_observed(next.run_id, &next.event, &observer)
                    .await;
                if run.failure.is_some() {
                    error!("Deployment {} finished: {}", run.id, run.status);
                } else {
                    info!("Deployment {} finished: {}", run.id, run.status);
                }

                let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
                match pending.pop_front() {
                    Some(queued) => next = queued,
                    None => {
                        // Released while the pending queue is still locked
                        drop(permit);
                        return;
                    }
                }
            }
        });
    }

    /// Whether a run is active
    pub fn is_active(&self) -> bool {
        self.inner.permit.available_permits() == 0
    }

    /// Ids of the deferred runs, oldest first
    pub fn queued(&self) -> Vec<Uuid> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.run_id)
            .collect()
    }

    /// Waits until no run is active and nothing is queued
    pub async fn wait_idle(&self) {
        if let Ok(permit) = self.inner.permit.acquire().await {
            drop(permit);
        }
    }

    pub fn recent_runs(&self, limit: usize) -> Vec<DeploymentRun> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(limit)
    }

    pub fn get_run(&self, id: Uuid) -> Option<DeploymentRun> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
    }

    pub fn controller(&self) -> &PipelineController {
        &self.inner.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::service::MemoryLogSink;
    use crate::testing::{ScriptedRunner, sample_plan};
    use keel_core::domain::run::RunStatus;
    use std::time::Duration;

    fn build_scheduler(
        dir: &std::path::Path,
        policy: TriggerPolicy,
    ) -> (RunScheduler, Arc<ScriptedRunner>) {
        let plan = Arc::new(sample_plan(dir));
        let config = RunnerConfig::new(dir.join("keel.yaml"), dir.join("logs"))
            .with_settle_interval(Duration::ZERO)
            .with_trigger_policy(policy);
        let runner = Arc::new(
            ScriptedRunner::healthy().delay("git fetch", Duration::from_millis(300)),
        );
        let controller = Arc::new(PipelineController::new(
            plan,
            config,
            runner.clone(),
            Arc::new(MemoryLogSink::new()),
        ));
        (RunScheduler::new(controller, policy, 10), runner)
    }

    #[tokio::test]
    async fn test_queue_policy_serializes_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, runner) = build_scheduler(dir.path(), TriggerPolicy::Queue);

        let first = scheduler.submit(TriggerEvent::new("1"));
        let second = scheduler.submit(TriggerEvent::new("2"));
        let third = scheduler.submit(TriggerEvent::new("3"));

        assert_eq!(first.status, SubmissionStatus::Started);
        assert_eq!(second.status, SubmissionStatus::Queued);
        assert_eq!(third.status, SubmissionStatus::Queued);
        assert_ne!(third.run_id, second.run_id);
        assert!(scheduler.is_active());
        assert_eq!(
            scheduler.queued(),
            vec![second.run_id.unwrap(), third.run_id.unwrap()]
        );

        tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
            .await
            .unwrap();

        assert!(!scheduler.is_active());
        assert_eq!(runner.max_in_flight(), 1);
        // One run per trigger
        assert_eq!(runner.count("git fetch"), 3);
        assert!(scheduler.queued().is_empty());

        let runs = scheduler.recent_runs(10);
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.status == RunStatus::Success));
        // The queued run starts only after the first has finished
        let first_run = scheduler.get_run(first.run_id.unwrap()).unwrap();
        let second_run = scheduler.get_run(second.run_id.unwrap()).unwrap();
        let third_run = scheduler.get_run(third.run_id.unwrap()).unwrap();
        assert!(second_run.started_at >= first_run.finished_at.unwrap());
        assert!(third_run.started_at >= second_run.finished_at.unwrap());
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_concurrent_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, runner) = build_scheduler(dir.path(), TriggerPolicy::Reject);

        let first = scheduler.submit(TriggerEvent::new(""));
        let second = scheduler.submit(TriggerEvent::new(""));

        assert_eq!(first.status, SubmissionStatus::Started);
        assert_eq!(second.status, SubmissionStatus::Rejected);
        assert_eq!(second.run_id, None);
        assert_eq!(second.ack().message, "deployment in progress");

        tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
            .await
            .unwrap();
        assert_eq!(runner.count("git fetch"), 1);

        let third = scheduler.submit(TriggerEvent::new(""));
        assert_eq!(third.status, SubmissionStatus::Started);
    }

    #[tokio::test]
    async fn test_active_run_is_visible_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _runner) = build_scheduler(dir.path(), TriggerPolicy::Queue);

        let submission = scheduler.submit(TriggerEvent::new(""));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let run = scheduler.get_run(submission.run_id.unwrap()).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        scheduler.wait_idle().await;
        let run = scheduler.get_run(submission.run_id.unwrap()).unwrap();
        assert_eq!(run.status, RunStatus::Success);
    }
}
