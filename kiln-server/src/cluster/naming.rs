//! Resource naming
//!
//! Every cluster object belonging to an upload is named from the job name and
//! the upload id, so any component can compute the names (and the image
//! reference) without asking the cluster.

use std::collections::BTreeMap;
use uuid::Uuid;

/// Longest slug kept from the job name. 18 + 1 + 36 + len("-session") = 63,
/// the limit for a DNS-1123 label.
const MAX_SLUG_LEN: usize = 18;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const JOB_ID_LABEL: &str = "kiln.dev/job-id";
pub const SESSION_LABEL: &str = "kiln.dev/session";

/// Names of the cluster objects derived from one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    base: String,
}

impl ResourceNames {
    pub fn new(job_name: &str, upload_id: Uuid) -> Self {
        Self {
            base: format!("{}-{}", slug(job_name), upload_id),
        }
    }

    /// Repository part of the image reference
    pub fn image_repository(&self) -> &str {
        &self.base
    }

    pub fn build(&self) -> String {
        format!("{}-build", self.base)
    }

    pub fn run(&self) -> String {
        format!("{}-run", self.base)
    }

    pub fn session(&self) -> String {
        format!("{}-session", self.base)
    }
}

/// Lowercase DNS-1123 label fragment of an arbitrary display name
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }

    let trimmed: String = out.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let trimmed = trimmed.trim_end_matches('-');

    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Labels stamped on every workload belonging to a job
pub fn workload_labels(job_id: Uuid) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), "kiln".to_string()),
        (JOB_ID_LABEL.to_string(), job_id.to_string()),
    ])
}

/// Whether two label sets carry the same, present job id
pub fn same_owner(ours: &BTreeMap<String, String>, theirs: &BTreeMap<String, String>) -> bool {
    match (ours.get(JOB_ID_LABEL), theirs.get(JOB_ID_LABEL)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
