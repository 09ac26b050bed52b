//! Deployment plan
//!
//! The plan declares the desired state of the host: which capabilities must be
//! present, where the working copy lives, what to install and build, which
//! processes to supervise, how the proxy routes traffic and what to verify.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::capability::{CapabilitySpec, CommandLine};
use crate::domain::process::ProcessDescriptor;
use crate::domain::route::{RouteRule, RouteTable};
use crate::domain::stage::StageKind;

/// Complete description of a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub name: String,
    pub repository: RepositorySpec,
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
    pub backend: BackendSpec,
    #[serde(default)]
    pub frontend: Option<FrontendSpec>,
    #[serde(default)]
    pub processes: Vec<ProcessDescriptor>,
    #[serde(default)]
    pub supervisor: SupervisorSpec,
    pub proxy: ProxySpec,
    #[serde(default)]
    pub verify: VerifySpec,
    /// Capabilities each stage hard-depends on
    #[serde(default = "default_stage_requirements")]
    pub stage_requirements: BTreeMap<StageKind, Vec<String>>,
}

impl DeploymentPlan {
    /// Resolves a plan path against the repository working copy
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repository.path.join(path)
        }
    }

    /// Capabilities the given stage cannot run without
    pub fn requirements(&self, stage: StageKind) -> &[String] {
        self.stage_requirements
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(self.proxy.routes.clone())
    }
}

/// Default hard dependencies per stage
pub fn default_stage_requirements() -> BTreeMap<StageKind, Vec<String>> {
    BTreeMap::from([
        (StageKind::SyncSource, vec!["git".to_string()]),
        (StageKind::InstallBackend, vec!["python".to_string()]),
        (StageKind::InstallFrontend, vec!["node".to_string()]),
        (StageKind::BuildFrontend, vec!["node".to_string()]),
        (StageKind::ReconcileProcesses, vec!["pm2".to_string()]),
        (StageKind::ConfigureProxy, vec!["nginx".to_string()]),
    ])
}

/// Working copy and its canonical upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

/// Backend runtime environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Isolated environment directory, relative to the repository
    #[serde(default = "default_venv")]
    pub venv: PathBuf,
    /// Declared dependency manifest, relative to the repository
    #[serde(default = "default_requirements")]
    pub requirements: PathBuf,
    /// Interpreter used to create the environment
    #[serde(default = "default_python")]
    pub python: String,
    /// Packages that must be installed once the install stage is done
    #[serde(default)]
    pub required_packages: Vec<RequiredPackage>,
}

fn default_venv() -> PathBuf {
    PathBuf::from("venv")
}

fn default_requirements() -> PathBuf {
    PathBuf::from("requirements.txt")
}

fn default_python() -> String {
    "python3".to_string()
}

/// A critical package, optionally pinned to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl RequiredPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

/// Frontend install and build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendSpec {
    /// Frontend directory, relative to the repository
    pub dir: PathBuf,
    #[serde(default = "default_frontend_install")]
    pub install: CommandLine,
    #[serde(default = "default_frontend_build")]
    pub build: CommandLine,
}

fn default_frontend_install() -> CommandLine {
    CommandLine::new(["npm", "install"])
}

fn default_frontend_build() -> CommandLine {
    CommandLine::new(["npm", "run", "build"])
}

/// Process supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSpec {
    /// Where the process manifest is written
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_supervisor_program")]
    pub program: String,
}

impl Default for SupervisorSpec {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            program: default_supervisor_program(),
        }
    }
}

fn default_manifest() -> PathBuf {
    PathBuf::from("ecosystem.config.json")
}

fn default_supervisor_program() -> String {
    "pm2".to_string()
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Site name used for the configuration file and its symlink
    pub site: String,
    #[serde(default = "default_available_dir")]
    pub available_dir: PathBuf,
    #[serde(default = "default_enabled_dir")]
    pub enabled_dir: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: u16,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Directory holding built static assets, served for unmatched paths
    pub static_root: PathBuf,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Validates the rendered configuration before reloading
    #[serde(default = "default_proxy_test")]
    pub test_command: CommandLine,
    #[serde(default = "default_proxy_reload")]
    pub reload_command: CommandLine,
}

fn default_available_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_enabled_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_listen() -> u16 {
    80
}

fn default_server_name() -> String {
    "_".to_string()
}

fn default_proxy_test() -> CommandLine {
    CommandLine::new(["nginx", "-t"])
}

fn default_proxy_reload() -> CommandLine {
    CommandLine::new(["systemctl", "reload", "nginx"])
}

/// Post-deployment checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySpec {
    /// Ports that must be bound by a listening process
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Internal endpoints probed for reachability
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
}

impl Default for VerifySpec {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            endpoints: Vec::new(),
            timeout_secs: default_verify_timeout(),
        }
    }
}

fn default_verify_timeout() -> u64 {
    3
}
