//! Job DTOs for the HTTP surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::StatusEvent;
use crate::domain::job::{Job, JobKind, JobPhase};

/// Lightweight job view for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: JobKind,
    #[serde(rename = "status")]
    pub phase: JobPhase,
    pub status_detail: Option<String>,
    pub ttl: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            kind: job.kind,
            phase: job.phase,
            status_detail: job.status_detail.clone(),
            ttl: job.ttl_seconds,
            created_at: job.created_at,
        }
    }
}

/// Response of `GET /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<JobSummary>,
}

/// Response of `GET /jobs/{id}/history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub job_id: Uuid,
    pub job_name: String,
    pub phase: JobPhase,
    pub history: Vec<StatusEvent>,
}

/// Response of `GET /jobs/{id}/logs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogs {
    pub job_id: Uuid,
    /// Execution unit the logs were read from
    pub unit: String,
    pub logs: String,
}
