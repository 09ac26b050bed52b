//! Runner configuration
//!
//! Defines the tunables of the deployment pipeline: where the plan and logs
//! live, how long a run may take, how much subprocess output is kept and how
//! concurrent triggers are handled.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What to do with a trigger that arrives while a run is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Defer it until the active run finishes
    Queue,
    /// Refuse it with a "deployment in progress" signal
    Reject,
}

impl FromStr for TriggerPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(TriggerPolicy::Queue),
            "reject" => Ok(TriggerPolicy::Reject),
            other => anyhow::bail!("unknown trigger policy '{}' (expected queue or reject)", other),
        }
    }
}

/// Runner configuration
///
/// All limits are configurable so tests and slow hosts can tune them.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Deployment plan file
    pub plan_path: PathBuf,

    /// Directory receiving `deploy.log` and `deploy-error.log`
    pub log_dir: PathBuf,

    /// Upper bound for a whole deployment run
    pub run_timeout: Duration,

    /// Maximum bytes kept from each of a subprocess's stdout and stderr
    pub max_output_bytes: usize,

    /// Wait between starting a service and re-checking it
    pub settle_interval: Duration,

    /// Handling of triggers that arrive during an active run
    pub trigger_policy: TriggerPolicy,

    /// Number of finished runs kept in memory
    pub history_size: usize,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(plan_path: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            plan_path,
            log_dir,
            run_timeout: Duration::from_secs(20 * 60),
            max_output_bytes: 5 * 1024 * 1024,
            settle_interval: Duration::from_secs(3),
            trigger_policy: TriggerPolicy::Queue,
            history_size: 20,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_PLAN (optional, default: keel.yaml)
    /// - KEEL_LOG_DIR (optional, default: logs)
    /// - KEEL_RUN_TIMEOUT (optional, seconds, default: 1200)
    /// - KEEL_MAX_OUTPUT_BYTES (optional, default: 5242880)
    /// - KEEL_SETTLE_SECS (optional, seconds, default: 3)
    /// - KEEL_TRIGGER_POLICY (optional, queue|reject, default: queue)
    /// - KEEL_HISTORY_SIZE (optional, default: 20)
    ///
    /// A variable that is set but malformed is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let plan_path = lookup("KEEL_PLAN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("keel.yaml"));

        let log_dir = lookup("KEEL_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs"));

        let mut config = Self::new(plan_path, log_dir);

        if let Some(secs) = parse_var::<u64>(&lookup, "KEEL_RUN_TIMEOUT")? {
            config.run_timeout = Duration::from_secs(secs);
        }

        if let Some(bytes) = parse_var::<usize>(&lookup, "KEEL_MAX_OUTPUT_BYTES")? {
            config.max_output_bytes = bytes;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "KEEL_SETTLE_SECS")? {
            config.settle_interval = Duration::from_secs(secs);
        }

        if let Some(policy) = lookup("KEEL_TRIGGER_POLICY") {
            config.trigger_policy = policy.parse()?;
        }

        if let Some(size) = parse_var::<usize>(&lookup, "KEEL_HISTORY_SIZE")? {
            config.history_size = size;
        }

        Ok(config)
    }

    pub fn with_trigger_policy(mut self, policy: TriggerPolicy) -> Self {
        self.trigger_policy = policy;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plan_path.as_os_str().is_empty() {
            anyhow::bail!("plan_path cannot be empty");
        }

        if self.run_timeout.is_zero() {
            anyhow::bail!("run_timeout must be greater than 0");
        }

        if self.max_output_bytes == 0 {
            anyhow::bail!("max_output_bytes must be greater than 0");
        }

        if self.history_size == 0 {
            anyhow::bail!("history_size must be greater than 0");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("keel.yaml"), PathBuf::from("logs"))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("invalid value '{}' for {}", value, key)),
        None => Ok(None),
    }
}
