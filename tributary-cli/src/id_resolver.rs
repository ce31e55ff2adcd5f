//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by querying the orchestrator,
//! so users can type a short, unambiguous prefix instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use tributary_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Runs fetched per pipeline when searching for a prefix
const SEARCH_DEPTH: u32 = 100;

/// Resolve a run ID or prefix to a full UUID
///
/// A full UUID is returned as-is. A prefix is matched against the most
/// recent runs of every pipeline.
///
/// # Errors
/// Returns an error if no run matches, several runs match, or an API call fails.
pub async fn resolve_run_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let prefix = id_or_prefix.as_str().to_lowercase();

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    let mut candidates = Vec::new();
    for pipeline in pipelines {
        let runs = client
            .list_runs(&pipeline.name, SEARCH_DEPTH)
            .await
            .with_context(|| format!("Failed to fetch runs of {}", pipeline.name))?;
        candidates.extend(runs.into_iter().map(|r| r.id));
    }

    pick_unique(&prefix, candidates)
}

fn pick_unique(prefix: &str, candidates: Vec<Uuid>) -> Result<Uuid> {
    let matches: Vec<Uuid> = candidates
        .into_iter()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
