//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::handle::{BuildHandle, SessionEndpoint, WorkloadHandle};

/// A submitted bundle tracked from ingestion to completion
///
/// Structure shared between server (persists and mutates) and client (reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Identifier of the isolated upload workspace this job was built from
    pub upload_id: Uuid,
    /// User supplied display name, not unique
    pub name: String,
    pub kind: JobKind,
    pub phase: JobPhase,
    /// Fine-grained status from the last observation (e.g. `ImagePullBackOff`)
    pub status_detail: Option<String>,
    /// Entry file path relative to the bundle root
    pub entry_file: String,
    pub dependency_hints: BTreeSet<String>,
    pub resources: Resources,
    pub env: BTreeMap<String, String>,
    pub ttl_seconds: Option<u64>,
    pub build_handle: Option<BuildHandle>,
    pub exec_handle: Option<WorkloadHandle>,
    pub session: Option<SessionEndpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Coarse lifecycle phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    Unknown,
    Received,
    Validating,
    Building,
    BuildFailed,
    Launching,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    /// Position along the canonical sequence. Terminal branches share the
    /// rank of the step they end.
    fn rank(self) -> u8 {
        match self {
            JobPhase::Unknown => 0,
            JobPhase::Received => 1,
            JobPhase::Validating => 2,
            JobPhase::Building => 3,
            JobPhase::BuildFailed => 4,
            JobPhase::Launching => 4,
            JobPhase::Running => 5,
            JobPhase::Succeeded => 6,
            JobPhase::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::BuildFailed | JobPhase::Succeeded | JobPhase::Failed
        )
    }

    /// Whether moving from `self` to `next` goes strictly forward
    pub fn can_advance_to(self, next: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            JobPhase::Unknown => false,
            JobPhase::BuildFailed => self.rank() <= JobPhase::Building.rank(),
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Unknown => "Unknown",
            JobPhase::Received => "Received",
            JobPhase::Validating => "Validating",
            JobPhase::Building => "Building",
            JobPhase::BuildFailed => "BuildFailed",
            JobPhase::Launching => "Launching",
            JobPhase::Running => "Running",
            JobPhase::Succeeded => "Succeeded",
            JobPhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(JobPhase::Unknown),
            "Received" => Ok(JobPhase::Received),
            "Validating" => Ok(JobPhase::Validating),
            "Building" => Ok(JobPhase::Building),
            "BuildFailed" => Ok(JobPhase::BuildFailed),
            "Launching" => Ok(JobPhase::Launching),
            "Running" => Ok(JobPhase::Running),
            "Succeeded" => Ok(JobPhase::Succeeded),
            "Failed" => Ok(JobPhase::Failed),
            other => Err(format!("unknown job phase '{}'", other)),
        }
    }
}

/// What gets launched once the image is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Run-to-completion batch workload
    #[default]
    Batch,
    /// Time-bounded interactive session reachable over HTTP
    Interactive,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Batch => "batch",
            JobKind::Interactive => "interactive",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(JobKind::Batch),
            "interactive" | "session" => Ok(JobKind::Interactive),
            other => Err(format!(
                "unknown job type '{}' (expected batch or interactive)",
                other
            )),
        }
    }
}

/// Compute resources requested for the run container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Whole CPU cores (1-64)
    pub cpu: u32,
    /// Memory in GiB (1-256)
    pub memory_gb: u32,
    /// GPU count (0-8)
    pub gpu: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu: 1,
            memory_gb: 1,
            gpu: 0,
        }
    }
}

impl Resources {
    pub const MAX_CPU: u32 = 64;
    pub const MAX_MEMORY_GB: u32 = 256;
    pub const MAX_GPU: u32 = 8;

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=Self::MAX_CPU).contains(&self.cpu) {
            return Err(format!("cpu must be between 1 and {}", Self::MAX_CPU));
        }
        if !(1..=Self::MAX_MEMORY_GB).contains(&self.memory_gb) {
            return Err(format!(
                "memory must be between 1 and {} GiB",
                Self::MAX_MEMORY_GB
            ));
        }
        if self.gpu > Self::MAX_GPU {
            return Err(format!("gpu must be between 0 and {}", Self::MAX_GPU));
        }
        Ok(())
    }
}
