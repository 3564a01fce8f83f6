//! Handles returned by the external build executor and orchestrator

use serde::{Deserialize, Serialize};

/// Reference to a workload submitted to the cluster orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadHandle {
    pub name: String,
    pub namespace: String,
    /// Server-assigned uid, when the orchestrator reported one
    pub uid: Option<String>,
}

impl std::fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Fully qualified image reference
///
/// The push address is what the builder writes to; the pull address is what
/// the cluster nodes read from. Inside a cluster these can differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub push: String,
    pub pull: String,
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.push)
    }
}

/// Tracking object for a submitted image build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHandle {
    pub workload: WorkloadHandle,
    pub image: ImageRef,
}

/// Network endpoint and credential of an interactive session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndpoint {
    pub service: String,
    pub host: String,
    pub url: String,
    pub token: String,
    /// Seconds after which the session workload is stopped by the orchestrator
    pub active_deadline_seconds: u64,
}
