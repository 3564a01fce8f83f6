//! Orchestrator JSON wire types
//!
//! Only the fields the server reads out of `kubectl ... -o json` are modelled;
//! everything else is ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{ClusterEvent, Conditions, ContainerState, Unit, UnitPhase};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    pub uid: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

// ============================================================================
// Pods
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub phase: Option<String>,
    #[serde(default)]
    pub init_container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub state: ContainerStateWire,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerStateWire {
    pub waiting: Option<WaitingState>,
    pub running: Option<serde_json::Value>,
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Deserialize)]
pub struct WaitingState {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    pub reason: Option<String>,
    #[serde(default)]
    pub exit_code: i32,
}

impl ContainerStateWire {
    fn into_state(self) -> Option<ContainerState> {
        if let Some(waiting) = self.waiting {
            Some(ContainerState::Waiting {
                reason: waiting.reason,
            })
        } else if let Some(terminated) = self.terminated {
            Some(ContainerState::Terminated {
                reason: terminated.reason,
                exit_code: terminated.exit_code,
            })
        } else if self.running.is_some() {
            Some(ContainerState::Running)
        } else {
            None
        }
    }
}

fn parse_unit_phase(phase: Option<&str>) -> UnitPhase {
    match phase {
        Some("Pending") => UnitPhase::Pending,
        Some("Running") => UnitPhase::Running,
        Some("Succeeded") => UnitPhase::Succeeded,
        Some("Failed") => UnitPhase::Failed,
        _ => UnitPhase::Unknown,
    }
}

impl From<Pod> for Unit {
    fn from(pod: Pod) -> Self {
        let phase = parse_unit_phase(pod.status.phase.as_deref());
        let containers = pod
            .status
            .init_container_statuses
            .into_iter()
            .chain(pod.status.container_statuses)
            .filter_map(|status| status.state.into_state())
            .collect();

        Unit {
            name: pod.metadata.name,
            created_at: pod
                .metadata
                .creation_timestamp
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            phase,
            containers,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JobObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: JobStatusWire,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobStatusWire {
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
}

#[derive(Debug, Deserialize)]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl JobCondition {
    fn holds(&self, kind: &str) -> bool {
        self.kind == kind && self.status == "True"
    }
}

impl From<JobStatusWire> for Conditions {
    fn from(status: JobStatusWire) -> Self {
        let complete = status.conditions.iter().any(|c| c.holds("Complete"));
        let failed_condition = status.conditions.iter().find(|c| c.holds("Failed"));

        Conditions {
            complete,
            failed: failed_condition.is_some(),
            reason: failed_condition.and_then(|c| c.reason.clone().or_else(|| c.message.clone())),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub involved_object: ObjectReference,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl Event {
    /// Whether the event is about the workload `name` or one of its units
    pub fn concerns(&self, workload: &str) -> bool {
        let object = &self.involved_object;
        match object.kind.as_str() {
            "Job" => object.name == workload,
            "Pod" => object
                .name
                .strip_prefix(workload)
                .is_some_and(|rest| rest.starts_with('-')),
            _ => false,
        }
    }

    /// Converts to a cluster event; events carrying no timestamp at all are dropped
    pub fn into_cluster_event(self) -> Option<ClusterEvent> {
        let timestamp = self
            .event_time
            .or(self.first_timestamp)
            .or(self.last_timestamp)
            .or(self.metadata.creation_timestamp)?;

        Some(ClusterEvent {
            timestamp,
            object: self.involved_object.name,
            reason: self.reason,
            message: self.message.unwrap_or_default(),
        })
    }
}
