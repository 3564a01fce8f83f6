//! Lifecycle Tracking
//!
//! Normalizes what the orchestrator reports about a workload into job-level
//! state, history entries and logs. The normalization functions are pure; the
//! tracker only fetches raw state and feeds it through them.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::cluster::{
    ClusterError, ClusterEvent, Conditions, ContainerState, Orchestrator, Unit, UnitPhase,
};
use kiln_core::domain::event::{EventLabel, StatusEvent};
use kiln_core::domain::handle::WorkloadHandle;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The workload was deleted or expired
    #[error("workload {0} no longer exists")]
    HandleNotFound(String),

    #[error("orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// The workload exists but nothing was scheduled for it yet
    #[error("workload {0} has no execution units yet")]
    NoUnits(String),
}

impl LifecycleError {
    fn from_cluster(handle: &WorkloadHandle, err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound(_) => LifecycleError::HandleNotFound(handle.to_string()),
            ClusterError::Unavailable(msg)
            | ClusterError::Rejected(msg)
            | ClusterError::AlreadyExists(msg) => {
                LifecycleError::OrchestratorUnavailable(msg)
            }
        }
    }
}

/// Aggregated state of one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    Pending { reason: Option<String> },
    Running { reason: Option<String> },
    Succeeded,
    Failed { reason: Option<String> },
}

impl WorkloadState {
    /// Fine-grained reason to show next to the coarse phase
    pub fn detail(&self) -> Option<String> {
        match self {
            WorkloadState::Pending { reason }
            | WorkloadState::Running { reason }
            | WorkloadState::Failed { reason } => reason.clone(),
            WorkloadState::Succeeded => None,
        }
    }
}

/// Status of one unit after applying container precedence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Waiting(String),
    Terminated(String),
    Running,
    Phase(UnitPhase),
}

/// Reduces a unit to one status
///
/// A waiting container (with its reason) wins over a terminated one, which
/// wins over a running one; without container detail the unit phase is used.
pub fn unit_status(unit: &Unit) -> UnitStatus {
    let waiting = unit.containers.iter().find_map(|c| match c {
        ContainerState::Waiting { reason } => {
            Some(reason.clone().unwrap_or_else(|| "Waiting".to_string()))
        }
        _ => None,
    });
    if let Some(reason) = waiting {
        return UnitStatus::Waiting(reason);
    }

    let terminated = unit.containers.iter().find_map(|c| match c {
        ContainerState::Terminated { reason, exit_code } => Some(
            reason
                .clone()
                .unwrap_or_else(|| format!("Exited({})", exit_code)),
        ),
        _ => None,
    });
    if let Some(reason) = terminated {
        return UnitStatus::Terminated(reason);
    }

    if unit.containers.iter().any(|c| *c == ContainerState::Running) {
        return UnitStatus::Running;
    }

    UnitStatus::Phase(unit.phase)
}

/// Aggregates workload conditions and unit statuses
///
/// Completion conditions are authoritative. Otherwise any running unit makes
/// the workload running, a waiting unit keeps it pending with the waiting
/// reason, and a unit that terminated without a condition yet keeps it running
/// until the orchestrator decides.
pub fn aggregate(units: &[Unit], conditions: &Conditions) -> WorkloadState {
    if conditions.complete {
        return WorkloadState::Succeeded;
    }
    if conditions.failed {
        return WorkloadState::Failed {
            reason: conditions.reason.clone(),
        };
    }

    let statuses: Vec<UnitStatus> = units.iter().map(unit_status).collect();

    if statuses
        .iter()
        .any(|s| matches!(s, UnitStatus::Running | UnitStatus::Phase(UnitPhase::Running)))
    {
        return WorkloadState::Running { reason: None };
    }

    if let Some(reason) = statuses.iter().find_map(|s| match s {
        UnitStatus::Waiting(reason) => Some(reason.clone()),
        _ => None,
    }) {
        return WorkloadState::Pending {
            reason: Some(reason),
        };
    }

    if let Some(reason) = statuses.iter().find_map(|s| match s {
        UnitStatus::Terminated(reason) => Some(reason.clone()),
        UnitStatus::Phase(phase @ (UnitPhase::Succeeded | UnitPhase::Failed)) => {
            Some(phase.as_str().to_string())
        }
        _ => None,
    }) {
        return WorkloadState::Running {
            reason: Some(reason),
        };
    }

    WorkloadState::Pending { reason: None }
}

/// Maps an orchestrator event message onto the history vocabulary
///
/// Rules are checked in order; messages matching none are not history.
pub fn classify_event(message: &str) -> Option<EventLabel> {
    const RULES: [(&str, EventLabel); 9] = [
        ("Created pod", EventLabel::Created),
        ("Started container", EventLabel::Running),
        ("Successfully pulled image", EventLabel::ImagePulled),
        ("Pulling image", EventLabel::PullingImage),
        ("Job completed", EventLabel::Complete),
        ("Completed", EventLabel::Complete),
        ("Failed", EventLabel::Error),
        ("Error", EventLabel::Error),
        ("Back-off", EventLabel::BackOff),
    ];

    RULES
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, label)| *label)
}

/// Classifies raw events and orders them by timestamp, oldest first
pub fn normalize_history(mut events: Vec<ClusterEvent>) -> Vec<StatusEvent> {
    events.sort_by_key(|e| e.timestamp);

    events
        .into_iter()
        .filter_map(|event| {
            let label = classify_event(&event.message);
            if label.is_none() {
                debug!("Dropping unclassified event: {}", event.message);
            }
            label.map(|label| StatusEvent {
                timestamp: event.timestamp,
                label,
                message: event.message,
            })
        })
        .collect()
}

/// Unit whose logs represent the workload: the most recently created one
pub fn log_unit(units: &[Unit]) -> Option<&Unit> {
    units.iter().max_by_key(|u| u.created_at)
}

pub struct LifecycleTracker {
    orchestrator: Arc<dyn Orchestrator>,
}

impl LifecycleTracker {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Fetches and aggregates the current state of a workload
    pub async fn observe(&self, handle: &WorkloadHandle) -> Result<WorkloadState, LifecycleError> {
        let conditions = self
            .orchestrator
            .get_conditions(handle)
            .await
            .map_err(|e| LifecycleError::from_cluster(handle, e))?;

        if conditions.is_terminal() {
            return Ok(aggregate(&[], &conditions));
        }

        let units = self
            .orchestrator
            .list_units(handle)
            .await
            .map_err(|e| LifecycleError::from_cluster(handle, e))?;

        Ok(aggregate(&units, &conditions))
    }

    /// Normalized history across one or more workloads of a job
    pub async fn history(&self, handles: &[&WorkloadHandle]) -> Result<Vec<StatusEvent>, LifecycleError> {
        let mut events = Vec::new();
        for handle in handles {
            match self.orchestrator.get_events(handle).await {
                Ok(found) => events.extend(found),
                // Expired workloads simply contribute nothing new.
                Err(ClusterError::NotFound(_)) => {}
                Err(e) => return Err(LifecycleError::from_cluster(handle, e)),
            }
        }
        Ok(normalize_history(events))
    }

    /// Logs of the most recent unit
    ///
    /// # Returns
    /// The unit name and its log text
    pub async fn logs(&self, handle: &WorkloadHandle) -> Result<(String, String), LifecycleError> {
        let units = self
            .orchestrator
            .list_units(handle)
            .await
            .map_err(|e| LifecycleError::from_cluster(handle, e))?;

        let Some(unit) = log_unit(&units) else {
            // Distinguish "not scheduled yet" from "gone".
            self.orchestrator
                .get_conditions(handle)
                .await
                .map_err(|e| LifecycleError::from_cluster(handle, e))?;
            return Err(LifecycleError::NoUnits(handle.to_string()));
        };

        let logs = self
            .orchestrator
            .get_logs(handle, unit)
            .await
            .map_err(|e| LifecycleError::from_cluster(handle, e))?;

        Ok((unit.name.clone(), logs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeOrchestrator;
    use crate::cluster::{ContainerSpec, WorkloadSpec};
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeMap;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_700_000_000 + secs)
    }

    fn unit(name: &str, created: i64, phase: UnitPhase, containers: Vec<ContainerState>) -> Unit {
        Unit {
            name: name.to_string(),
            created_at: ts(created),
            phase,
            containers,
        }
    }

    fn waiting(reason: &str) -> ContainerState {
        ContainerState::Waiting {
            reason: Some(reason.to_string()),
        }
    }

    fn event(secs: i64, message: &str) -> ClusterEvent {
        ClusterEvent {
            timestamp: ts(secs),
            object: "w".to_string(),
            reason: None,
            message: message.to_string(),
        }
    }

    fn spec(name: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.to_string(),
            labels: BTreeMap::new(),
            container: ContainerSpec {
                name: "main".to_string(),
                image: "img".to_string(),
                args: vec![],
                env: BTreeMap::new(),
                ports: vec![],
                resources: None,
                always_pull: false,
            },
            volumes: vec![],
            backoff_limit: None,
            ttl_seconds_after_finished: None,
            active_deadline_seconds: None,
            service_account: None,
        }
    }

    #[test]
    fn test_waiting_reason_wins_over_phase() {
        let u = unit("p", 0, UnitPhase::Pending, vec![waiting("ImagePullBackOff")]);
        assert_eq!(unit_status(&u), UnitStatus::Waiting("ImagePullBackOff".to_string()));

        let state = aggregate(&[u], &Conditions::default());
        assert_eq!(
            state,
            WorkloadState::Pending {
                reason: Some("ImagePullBackOff".to_string())
            }
        );
    }

    #[test]
    fn test_container_precedence() {
        let u = unit(
            "p",
            0,
            UnitPhase::Running,
            vec![
                ContainerState::Running,
                ContainerState::Terminated {
                    reason: None,
                    exit_code: 1,
                },
            ],
        );
        assert_eq!(unit_status(&u), UnitStatus::Terminated("Exited(1)".to_string()));

        let u = unit("p", 0, UnitPhase::Pending, vec![]);
        assert_eq!(unit_status(&u), UnitStatus::Phase(UnitPhase::Pending));
    }

    #[test]
    fn test_conditions_are_authoritative() {
        let units = [unit("p", 0, UnitPhase::Running, vec![ContainerState::Running])];
        let complete = Conditions {
            complete: true,
            ..Conditions::default()
        };
        assert_eq!(aggregate(&units, &complete), WorkloadState::Succeeded);

        let failed = Conditions {
            failed: true,
            reason: Some("DeadlineExceeded".to_string()),
            ..Conditions::default()
        };
        assert_eq!(
            aggregate(&units, &failed),
            WorkloadState::Failed {
                reason: Some("DeadlineExceeded".to_string())
            }
        );
    }

    #[test]
    fn test_any_running_unit_makes_workload_running() {
        let units = [
            unit("a", 0, UnitPhase::Failed, vec![]),
            unit("b", 1, UnitPhase::Pending, vec![waiting("ContainerCreating")]),
            unit("c", 2, UnitPhase::Running, vec![ContainerState::Running]),
        ];
        assert_eq!(
            aggregate(&units, &Conditions::default()),
            WorkloadState::Running { reason: None }
        );
    }

    #[test]
    fn test_terminated_without_condition_stays_running() {
        let units = [unit(
            "a",
            0,
            UnitPhase::Succeeded,
            vec![ContainerState::Terminated {
                reason: Some("Completed".to_string()),
                exit_code: 0,
            }],
        )];
        let state = aggregate(&units, &Conditions::default());
        assert_eq!(
            state,
            WorkloadState::Running {
                reason: Some("Completed".to_string())
            }
        );
    }

    #[test]
    fn test_no_units_is_pending() {
        assert_eq!(
            aggregate(&[], &Conditions::default()),
            WorkloadState::Pending { reason: None }
        );
    }

    #[test]
    fn test_classify_event_rules() {
        assert_eq!(classify_event("Created pod: w-abc"), Some(EventLabel::Created));
        assert_eq!(classify_event("Started container main"), Some(EventLabel::Running));
        assert_eq!(
            classify_event("Successfully pulled image \"x\" in 2s"),
            Some(EventLabel::ImagePulled)
        );
        assert_eq!(classify_event("Pulling image \"x\""), Some(EventLabel::PullingImage));
        assert_eq!(classify_event("Job completed"), Some(EventLabel::Complete));
        assert_eq!(
            classify_event("Back-off pulling image \"x\""),
            Some(EventLabel::BackOff)
        );
        assert_eq!(
            classify_event("Failed to pull image \"x\": not found"),
            Some(EventLabel::Error)
        );
        assert_eq!(classify_event("Error: ErrImagePull"), Some(EventLabel::Error));
        assert_eq!(classify_event("Scheduled to node-1"), None);
        // Earlier rules win.
        assert_eq!(
            classify_event("Back-off restarting Failed container"),
            Some(EventLabel::Error)
        );
    }

    #[test]
    fn test_history_sorted_and_filtered() {
        let history = normalize_history(vec![
            event(30, "Started container main"),
            event(10, "Pulling image \"busybox\""),
            event(5, "Successfully assigned default/w to node-1"),
            event(20, "Successfully pulled image \"busybox\""),
        ]);

        let labels: Vec<EventLabel> = history.iter().map(|e| e.label).collect();
        assert_eq!(
            labels,
            vec![
                EventLabel::PullingImage,
                EventLabel::ImagePulled,
                EventLabel::Running
            ]
        );
        assert_eq!(history[0].message, "Pulling image \"busybox\"");
    }

    #[test]
    fn test_log_unit_is_newest() {
        let units = [
            unit("first", 0, UnitPhase::Failed, vec![]),
            unit("retry", 60, UnitPhase::Running, vec![]),
        ];
        assert_eq!(log_unit(&units).map(|u| u.name.as_str()), Some("retry"));
        assert!(log_unit(&[]).is_none());
    }

    #[tokio::test]
    async fn test_observe_image_pull_backoff() {
        let fake = Arc::new(FakeOrchestrator::new());
        let handle = fake.submit_workload(&spec("w-run")).await.unwrap();
        fake.set_units(
            "w-run",
            vec![unit("w-run-abc", 0, UnitPhase::Pending, vec![waiting("ImagePullBackOff")])],
        );

        let tracker = LifecycleTracker::new(fake.clone());
        let state = tracker.observe(&handle).await.unwrap();

        assert_eq!(state.detail().as_deref(), Some("ImagePullBackOff"));
        assert!(matches!(state, WorkloadState::Pending { .. }));
    }

    #[tokio::test]
    async fn test_observe_expired_and_unavailable() {
        let fake = Arc::new(FakeOrchestrator::new());
        let handle = fake.submit_workload(&spec("w-run")).await.unwrap();
        let tracker = LifecycleTracker::new(fake.clone());

        fake.set_unavailable(true);
        assert!(matches!(
            tracker.observe(&handle).await,
            Err(LifecycleError::OrchestratorUnavailable(_))
        ));

        fake.set_unavailable(false);
        fake.delete("w-run");
        assert!(matches!(
            tracker.observe(&handle).await,
            Err(LifecycleError::HandleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_logs_from_newest_unit() {
        let fake = Arc::new(FakeOrchestrator::new());
        let handle = fake.submit_workload(&spec("w-run")).await.unwrap();
        let tracker = LifecycleTracker::new(fake.clone());

        assert!(matches!(
            tracker.logs(&handle).await,
            Err(LifecycleError::NoUnits(_))
        ));

        fake.set_units(
            "w-run",
            vec![
                unit("w-run-old", 0, UnitPhase::Failed, vec![]),
                unit("w-run-new", 60, UnitPhase::Running, vec![]),
            ],
        );
        fake.set_logs("w-run", "w-run-old", "attempt 1\n");
        fake.set_logs("w-run", "w-run-new", "attempt 2\n");

        let (unit, logs) = tracker.logs(&handle).await.unwrap();
        assert_eq!(unit, "w-run-new");
        assert_eq!(logs, "attempt 2\n");
    }
}
