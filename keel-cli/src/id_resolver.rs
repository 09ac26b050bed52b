//! ID resolver module
//!
//! Resolves run id prefixes to full UUIDs by querying the run history, so
//! users can type short, unambiguous prefixes.

use anyhow::{Context, Result, anyhow};
use keel_client::OrchestratorClient;
use keel_core::dto::run::RunSummary;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// How many history entries are searched for a prefix
const RESOLVE_WINDOW: usize = 100;

/// Resolve a run ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if:
/// - No run matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_run_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs(RESOLVE_WINDOW)
        .await
        .context("Failed to fetch runs for ID resolution")?;

    pick_unique(&runs, id_or_prefix)
}

fn pick_unique(runs: &[RunSummary], id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let matches: Vec<Uuid> = runs
        .iter()
        .map(|r| r.id)
        .filter(|id| id_or_prefix.matches(id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", id_or_prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}
