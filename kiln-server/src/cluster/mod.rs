//! Cluster boundary
//!
//! Traits and value types for the two external systems the server drives:
//! the workload orchestrator (jobs, pods, events, logs) and the image build
//! executor. Everything above this module talks to the traits only, so the
//! lifecycle logic can be exercised against an in-process fake.

pub mod kaniko;
pub mod kubectl;
pub mod manifest;
pub mod naming;
pub mod wire;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::domain::handle::{BuildHandle, ImageRef, WorkloadHandle};
use kiln_core::domain::job::Resources;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures talking to the orchestrator or build executor
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The referenced resource does not exist (deleted or expired)
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The spec was refused (invalid manifest, quota)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// An object with the requested name exists and belongs to someone else
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Transport, authentication or timeout failure. Retryable.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

/// Batch workload to submit
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub container: ContainerSpec,
    pub volumes: Vec<VolumeMount>,
    /// Retries the orchestrator may spend on infrastructure failures
    pub backoff_limit: Option<u32>,
    pub ttl_seconds_after_finished: Option<u64>,
    pub active_deadline_seconds: Option<u64>,
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<u16>,
    pub resources: Option<Resources>,
    pub always_pull: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSource {
    Claim(String),
    Secret(String),
    EmptyDir,
}

/// Service plus routable hostname in front of a session workload
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub port: u16,
    pub host: String,
}

/// Coarse lifecycle phase of a single execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl UnitPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitPhase::Pending => "Pending",
            UnitPhase::Running => "Running",
            UnitPhase::Succeeded => "Succeeded",
            UnitPhase::Failed => "Failed",
            UnitPhase::Unknown => "Unknown",
        }
    }
}

/// Container-level sub-state reported for a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Waiting { reason: Option<String> },
    Running,
    Terminated { reason: Option<String>, exit_code: i32 },
}

/// Smallest schedulable instance of a workload
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub phase: UnitPhase,
    pub containers: Vec<ContainerState>,
}

/// Completion flags of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub complete: bool,
    pub failed: bool,
    pub reason: Option<String>,
}

impl Conditions {
    pub fn is_terminal(&self) -> bool {
        self.complete || self.failed
    }
}

/// Raw entry from the orchestrator's event log
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub timestamp: DateTime<Utc>,
    pub object: String,
    pub reason: Option<String>,
    pub message: String,
}

/// Workload orchestrator (job/pod scheduling)
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submits a batch workload and returns its handle
    ///
    /// Resubmitting a spec whose workload already exists with the same
    /// job-id label returns the existing workload's handle, so a submission
    /// whose outcome was lost can simply be repeated.
    async fn submit_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, ClusterError>;

    /// Lists the execution units selected by the workload's name label
    async fn list_units(&self, handle: &WorkloadHandle) -> Result<Vec<Unit>, ClusterError>;

    /// Reads the workload's completion conditions
    ///
    /// Fails with `NotFound` once the workload was deleted or expired.
    async fn get_conditions(&self, handle: &WorkloadHandle) -> Result<Conditions, ClusterError>;

    /// Events about the workload and its units, in no particular order
    async fn get_events(&self, handle: &WorkloadHandle) -> Result<Vec<ClusterEvent>, ClusterError>;

    /// Full log text of one unit
    async fn get_logs(&self, handle: &WorkloadHandle, unit: &Unit) -> Result<String, ClusterError>;

    /// Provisions a service and routable hostname. Idempotent.
    async fn expose(&self, spec: &EndpointSpec) -> Result<(), ClusterError>;
}

/// Registry credentials and transport trust handed to the builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryTrust {
    /// Push over plain HTTP / skip TLS verification
    pub insecure: bool,
    /// Secret holding a docker `config.json` for the registry
    pub docker_config_secret: Option<String>,
}

/// Image build request
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Build context directory, relative to the shared storage root
    pub context_dir: String,
    /// Entry file path relative to the context directory
    pub entry_file: String,
    pub destination: ImageRef,
    pub trust: RegistryTrust,
    pub ttl_seconds: Option<u64>,
}

/// Outcome of a build as seen by a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Pending,
    Succeeded(ImageRef),
    Failed(String),
}

/// Container image build executor
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, ClusterError>;

    async fn poll(&self, handle: &BuildHandle) -> Result<BuildOutcome, ClusterError>;
}
