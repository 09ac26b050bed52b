//! Capability domain types
//!
//! A capability is an infrastructure dependency the deployment needs on the
//! host: a database engine, a cache engine, a language runtime, the process
//! supervisor, the reverse proxy or the firewall.

use serde::{Deserialize, Serialize};

/// A command line declared in the deployment plan
///
/// Serialized as a plain list of strings, program first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(pub Vec<String>);

impl CommandLine {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Declaration of a capability in the deployment plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Unique capability name (e.g. "cache-engine")
    pub name: String,

    /// Side-effect-free detection command; exit status 0 means present
    pub probe: CommandLine,

    /// Service manager unit, when the capability runs as a service
    #[serde(default)]
    pub service: Option<String>,

    /// Process name whose presence proves the capability is actually running
    #[serde(default)]
    pub process: Option<String>,

    /// Primary install procedure
    pub install: CommandLine,

    /// Fallback install procedure, tried when the primary one fails
    #[serde(default)]
    pub fallback: Option<CommandLine>,
}

/// Result of probing a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    pub present: bool,
    pub running: bool,
}

impl ProbeResult {
    pub fn is_satisfied(&self) -> bool {
        self.present && self.running
    }
}

/// Availability of a capability after provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
}

/// What provisioning did for one capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub name: String,
    pub availability: Availability,
    /// Whether an install procedure was run
    pub installed: bool,
    /// Whether the service manager was asked to start the service
    pub started: bool,
    pub probe: ProbeResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_parts() {
        let cmd = CommandLine::new(["apt-get", "install", "-y", "redis-server"]);
        assert_eq!(cmd.program(), Some("apt-get"));
        assert_eq!(cmd.args().len(), 3);
        assert_eq!(cmd.to_string(), "apt-get install -y redis-server");
    }

    #[test]
    fn test_empty_command_line() {
        let cmd = CommandLine(vec![]);
        assert!(cmd.is_empty());
        assert_eq!(cmd.program(), None);
        assert!(cmd.args().is_empty());
    }

    #[test]
    fn test_probe_satisfaction() {
        assert!(
            ProbeResult {
                present: true,
                running: true
            }
            .is_satisfied()
        );
        assert!(
            !ProbeResult {
                present: true,
                running: false
            }
            .is_satisfied()
        );
    }
}
