//! Process descriptor domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A process the supervisor should keep running
///
/// The set of descriptors in a plan is the desired process set. Environment
/// values (including secrets) are forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub name: String,
    /// Entry point, relative to `cwd` or absolute
    pub script: PathBuf,
    pub cwd: PathBuf,
    /// Interpreter used to run the entry point
    pub interpreter: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
