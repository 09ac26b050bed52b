//! Stage domain types
//!
//! A deployment run walks a fixed list of stages. Each stage belongs to one
//! pipeline state and carries an abort policy that decides whether a failure
//! ends the run or is only logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// States of the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Provisioning,
    Syncing,
    Installing,
    Building,
    Reconciling,
    Configuring,
    Verifying,
    Terminal,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::Provisioning => "Provisioning",
            PipelineState::Syncing => "Syncing",
            PipelineState::Installing => "Installing",
            PipelineState::Building => "Building",
            PipelineState::Reconciling => "Reconciling",
            PipelineState::Configuring => "Configuring",
            PipelineState::Verifying => "Verifying",
            PipelineState::Terminal => "Terminal",
        };
        write!(f, "{}", name)
    }
}

/// What happens to the run when a stage fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortPolicy {
    AbortOnFailure,
    WarnAndContinue,
}

/// The stages of a deployment run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Provision,
    SyncSource,
    InstallBackend,
    VerifyPackages,
    InstallFrontend,
    BuildFrontend,
    ReconcileProcesses,
    ConfigureProxy,
    VerifyDeployment,
}

impl StageKind {
    /// Every stage in declaration order
    pub const ORDER: [StageKind; 9] = [
        StageKind::Provision,
        StageKind::SyncSource,
        StageKind::InstallBackend,
        StageKind::VerifyPackages,
        StageKind::InstallFrontend,
        StageKind::BuildFrontend,
        StageKind::ReconcileProcesses,
        StageKind::ConfigureProxy,
        StageKind::VerifyDeployment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Provision => "provision",
            StageKind::SyncSource => "sync-source",
            StageKind::InstallBackend => "install-backend",
            StageKind::VerifyPackages => "verify-packages",
            StageKind::InstallFrontend => "install-frontend",
            StageKind::BuildFrontend => "build-frontend",
            StageKind::ReconcileProcesses => "reconcile-processes",
            StageKind::ConfigureProxy => "configure-proxy",
            StageKind::VerifyDeployment => "verify-deployment",
        }
    }

    /// Pipeline state the machine is in while this stage runs
    pub fn state(&self) -> PipelineState {
        match self {
            StageKind::Provision => PipelineState::Provisioning,
            StageKind::SyncSource => PipelineState::Syncing,
            StageKind::InstallBackend | StageKind::VerifyPackages | StageKind::InstallFrontend => {
                PipelineState::Installing
            }
            StageKind::BuildFrontend => PipelineState::Building,
            StageKind::ReconcileProcesses => PipelineState::Reconciling,
            StageKind::ConfigureProxy => PipelineState::Configuring,
            StageKind::VerifyDeployment => PipelineState::Verifying,
        }
    }

    pub fn policy(&self) -> AbortPolicy {
        match self {
            // Individual capabilities are tolerated; stages that hard-depend on
            // a missing one abort on their own.
            StageKind::Provision | StageKind::VerifyDeployment => AbortPolicy::WarnAndContinue,
            _ => AbortPolicy::AbortOnFailure,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Precondition check reported the stage as already satisfied
    Skipped,
    /// Failed or produced findings under a warn-and-continue policy
    Warned,
    Failed,
}

/// Record of one executed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageKind,
    pub state: PipelineState,
    pub status: StageStatus,
    pub detail: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
