//! Test doubles
//!
//! `ScriptedRunner` answers commands from a script instead of touching the
//! host, records every invocation and tracks how many commands were in flight
//! at once. `sample_plan` builds a plan rooted in a temporary directory.

use async_trait::async_trait;
use keel_core::domain::capability::{CapabilitySpec, CommandLine};
use keel_core::domain::plan::{
    BackendSpec, DeploymentPlan, FrontendSpec, ProxySpec, RepositorySpec, RequiredPackage,
    SupervisorSpec, VerifySpec, default_stage_requirements,
};
use keel_core::domain::process::ProcessDescriptor;
use keel_core::domain::route::RouteRule;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

#[derive(Clone)]
enum Reply {
    Output(CommandOutput),
    /// Sleep, then succeed
    Delay(Duration),
}

struct Rule {
    pattern: String,
    reply: Reply,
    /// Remaining uses; `None` means unlimited
    remaining: Option<usize>,
}

/// Command runner driven by a script
///
/// A command matches a rule when its rendered command line contains the
/// rule's pattern. The most recently added matching rule wins; commands with
/// no matching rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner on which the sample plan deploys cleanly
    pub fn healthy() -> Self {
        Self::new().stdout(
            "pip list",
            "Flask==3.0.0\npymongo==4.6.1\nredis==5.0.1\ngunicorn==21.2.0\n",
        )
    }

    fn push(&self, pattern: &str, reply: Reply, remaining: Option<usize>) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                pattern: pattern.to_string(),
                reply,
                remaining,
            });
    }

    pub fn reply(self, pattern: &str, output: CommandOutput) -> Self {
        self.push(pattern, Reply::Output(output), None);
        self
    }

    pub fn stdout(self, pattern: &str, stdout: &str) -> Self {
        self.reply(
            pattern,
            CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                ..Default::default()
            },
        )
    }

    pub fn fail(self, pattern: &str) -> Self {
        self.push(pattern, Reply::Output(failed_output()), None);
        self
    }

    /// Fails the next `times` matching commands, then falls through
    pub fn fail_times(self, pattern: &str, times: usize) -> Self {
        self.push(pattern, Reply::Output(failed_output()), Some(times));
        self
    }

    pub fn delay(self, pattern: &str, duration: Duration) -> Self {
        self.push(pattern, Reply::Delay(duration), None);
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    /// Highest number of commands observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, line: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let found = rules
            .iter_mut()
            .rev()
            .find(|r| line.contains(&r.pattern) && r.remaining != Some(0));

        match found {
            Some(rule) => {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                rule.reply.clone()
            }
            None => Reply::Output(CommandOutput {
                code: Some(0),
                ..Default::default()
            }),
        }
    }
}

fn failed_output() -> CommandOutput {
    CommandOutput {
        code: Some(1),
        stderr: "scripted failure".to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let output = match self.next_reply(&line) {
            Reply::Output(output) => output,
            Reply::Delay(duration) => {
                tokio::time::sleep(duration).await;
                CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}

fn capability(name: &str, probe: &str, install: &[&str]) -> CapabilitySpec {
    CapabilitySpec {
        name: name.to_string(),
        probe: CommandLine::new(["sh", "-c", probe]),
        service: None,
        process: None,
        install: CommandLine::new(install.iter().copied()),
        fallback: None,
    }
}

fn process(
    name: &str,
    script: &str,
    cwd: &Path,
    venv: &Path,
    port: Option<u16>,
) -> ProcessDescriptor {
    let mut env = BTreeMap::from([
        ("REDIS_PASSWORD".to_string(), "s3cret".to_string()),
        (
            "MONGO_URI".to_string(),
            "mongodb://127.0.0.1:27017/webapp".to_string(),
        ),
    ]);
    if let Some(port) = port {
        env.insert("PORT".to_string(), port.to_string());
    }

    ProcessDescriptor {
        name: name.to_string(),
        script: PathBuf::from(script),
        cwd: cwd.to_path_buf(),
        interpreter: venv.join("bin/python"),
        env,
    }
}

/// Plan for a Flask backend with a bundled frontend, rooted in `root`
pub fn sample_plan(root: &Path) -> DeploymentPlan {
    let repo = root.join("app");
    let venv = repo.join("venv");

    let mut database = capability(
        "database-engine",
        "command -v mongod",
        &["apt-get", "install", "-y", "mongodb-org"],
    );
    database.service = Some("mongod".to_string());
    database.process = Some("mongod".to_string());
    database.fallback = Some(CommandLine::new(["snap", "install", "mongodb"]));

    let mut cache = capability(
        "cache-engine",
        "command -v redis-server",
        &["apt-get", "install", "-y", "redis-server"],
    );
    cache.service = Some("redis-server".to_string());
    cache.process = Some("redis-server".to_string());

    let mut pm2 = capability("pm2", "command -v pm2", &["npm", "install", "-g", "pm2"]);
    pm2.fallback = Some(CommandLine::new(["yarn", "global", "add", "pm2"]));

    let mut nginx = capability(
        "nginx",
        "command -v nginx",
        &["apt-get", "install", "-y", "nginx"],
    );
    nginx.service = Some("nginx".to_string());
    nginx.process = Some("nginx".to_string());

    let routes = vec![
        RouteRule::new("/api/", 5000),
        RouteRule::new("/api/templates", 5001),
        RouteRule::new("/api/endpoints", 5002),
        RouteRule::new("/api/auth/", 5000),
        RouteRule::new("/api/templates/render", 5001),
        RouteRule::new("/api/endpoints/logs", 5002),
        RouteRule::new("/socket.io/", 5000),
        RouteRule::new("/health", 5000).with_path("/api/health"),
        RouteRule::new("/static/uploads/", 5000),
    ];

    DeploymentPlan {
        name: "webapp".to_string(),
        repository: RepositorySpec {
            path: repo.clone(),
            remote: "origin".to_string(),
            branch: "main".to_string(),
        },
        capabilities: vec![
            capability("git", "command -v git", &["apt-get", "install", "-y", "git"]),
            capability(
                "python",
                "command -v python3",
                &["apt-get", "install", "-y", "python3", "python3-venv"],
            ),
            capability("node", "command -v node", &["apt-get", "install", "-y", "nodejs"]),
            database,
            cache,
            pm2,
            nginx,
            capability("firewall", "command -v ufw", &["apt-get", "install", "-y", "ufw"]),
        ],
        backend: BackendSpec {
            venv: PathBuf::from("venv"),
            requirements: PathBuf::from("backend/requirements.txt"),
            python: "python3".to_string(),
            required_packages: vec![
                RequiredPackage::new("flask"),
                RequiredPackage::new("pymongo"),
                RequiredPackage::new("redis"),
            ],
        },
        frontend: Some(FrontendSpec {
            dir: PathBuf::from("frontend"),
            install: CommandLine::new(["npm", "install"]),
            build: CommandLine::new(["npm", "run", "build"]),
        }),
        processes: vec![
            process("api", "backend/app.py", &repo, &venv, Some(5000)),
            process("templates", "backend/templates_service.py", &repo, &venv, Some(5001)),
            process("endpoints", "backend/endpoints_service.py", &repo, &venv, Some(5002)),
            process("worker", "backend/worker.py", &repo, &venv, None),
            process("scheduler", "backend/scheduler.py", &repo, &venv, None),
        ],
        supervisor: SupervisorSpec {
            manifest: PathBuf::from("ecosystem.config.json"),
            program: "pm2".to_string(),
        },
        proxy: ProxySpec {
            site: "webapp".to_string(),
            available_dir: root.join("nginx/sites-available"),
            enabled_dir: root.join("nginx/sites-enabled"),
            listen: 80,
            server_name: "_".to_string(),
            static_root: repo.join("frontend/dist"),
            routes,
            test_command: CommandLine::new(["nginx", "-t"]),
            reload_command: CommandLine::new(["systemctl", "reload", "nginx"]),
        },
        verify: VerifySpec {
            ports: Vec::new(),
            endpoints: Vec::new(),
            timeout_secs: 1,
        },
        stage_requirements: default_stage_requirements(),
    }
}
