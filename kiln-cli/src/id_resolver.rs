//! ID resolver module
//!
//! Resolves job id prefixes to full UUIDs by listing jobs on the server, so
//! users can type short unambiguous prefixes.

use anyhow::{Context, Result, anyhow};
use kiln_client::KilnClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// Full UUIDs are returned without contacting the server.
///
/// # Errors
/// Returns an error if no job or more than one job matches the prefix, or
/// if the job list cannot be fetched.
pub async fn resolve_job_id(client: &KilnClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| j.id), &id_or_prefix.to_string())
}

/// Picks the single id starting with `prefix`
fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
