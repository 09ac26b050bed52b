//! Route rule domain types
//!
//! Route rules map public path prefixes to internal upstreams. Evaluation
//! order matters: a more specific (longer) prefix must be evaluated before its
//! general parent, so `/api/templates/x` resolves against `/api/templates` and
//! never against `/api/`.

use serde::{Deserialize, Serialize};

/// Public path prefix mapped to an internal target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Path on the upstream; defaults to the public prefix
    #[serde(default)]
    pub path: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, port: u16) -> Self {
        Self {
            prefix: prefix.into(),
            host: default_host(),
            port,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Full upstream URL, e.g. `http://127.0.0.1:5000/api/`
    pub fn upstream(&self) -> String {
        let path = self.path.as_deref().unwrap_or(&self.prefix);
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Route rules in evaluation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Orders rules most specific first
    ///
    /// Longer prefixes come first; rules with equal length keep their
    /// declaration order.
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    /// First rule, in evaluation order, whose prefix matches the path
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
