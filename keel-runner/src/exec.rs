//! Command execution
//!
//! Every host interaction of the pipeline (package managers, git, the process
//! supervisor, the proxy) goes through the `CommandRunner` seam. The system
//! implementation spawns real subprocesses; tests substitute a scripted one.

use async_trait::async_trait;
use keel_core::domain::capability::CommandLine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// A command to execute on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Builds a spec from a plan command line
    pub fn from_line(line: &CommandLine) -> Result<Self> {
        let program = line
            .program()
            .ok_or_else(|| PipelineError::Plan("empty command line".to_string()))?;
        Ok(Self::new(program).args(line.args().iter().cloned()))
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether stdout or stderr exceeded the capture limit
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of a failure for log lines and error messages
    pub fn failure_summary(&self) -> String {
        let detail = last_line(&self.stderr).or_else(|| last_line(&self.stdout));
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        match detail {
            Some(line) => format!("exit_code={}: {}", code, line),
            None => format!("exit_code={}", code),
        }
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|l| !l.is_empty())
}

/// Executes commands on behalf of the pipeline
///
/// A non-zero exit status is not an error at this layer; callers decide what
/// a failed command means for their stage.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as local subprocesses
///
/// Children are killed when the returned future is dropped, which is how the
/// global run timeout terminates a hanging command.
pub struct SystemCommandRunner {
    max_output_bytes: usize,
}

impl SystemCommandRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Spawning: {}", spec);

        let spawn_error = |source: std::io::Error| PipelineError::Command {
            command: spec.to_string(),
            source,
        };

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(spawn_error)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("stdout pipe unavailable"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("stderr pipe unavailable"))
        })?;

        let limit = self.max_output_bytes;
        let ((stdout, stdout_cut), (stderr, stderr_cut), status) = tokio::try_join!(
            read_capped(stdout, limit),
            read_capped(stderr, limit),
            child.wait(),
        )
        .map_err(spawn_error)?;

        let output = CommandOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: stdout_cut || stderr_cut,
        };

        debug!(
            "Finished: {} exit_code={:?} stdout_len={} stderr_len={}",
            spec,
            output.code,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(output)
    }
}

/// Reads a stream to the end, keeping at most `limit` bytes
///
/// Excess bytes are drained and discarded so the child never blocks on a full
/// pipe. Returns the kept bytes and whether anything was dropped.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let room = limit.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    Ok((kept, truncated))
}
