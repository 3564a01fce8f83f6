//! Repository Module
//!
//! The job registry: the single source of truth for job identity, phase and
//! history. Two backends share the same merge rules:
//! - `memory`: process-local, the default
//! - `postgres`: durable, selected when a database URL is configured

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use kiln_core::domain::event::StatusEvent;
use kiln_core::domain::handle::{BuildHandle, SessionEndpoint, WorkloadHandle};
use kiln_core::domain::job::{Job, JobPhase};

pub use memory::InMemoryJobRegistry;
pub use postgres::PgJobRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Conflict(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored job is corrupt: {0}")]
    Corrupt(String),
}

/// External handle attached to a job as it moves through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum JobHandle {
    Build(BuildHandle),
    Exec(WorkloadHandle),
    /// Session endpoint planned before its workload is submitted
    Endpoint(SessionEndpoint),
    Session {
        workload: WorkloadHandle,
        endpoint: SessionEndpoint,
    },
}

/// Outcome of applying a phase observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseChange {
    /// The phase moved forward
    Advanced,
    /// Same phase; the detail was updated
    Refreshed,
    /// Stale or backward observation, nothing changed
    Ignored,
}

#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, RegistryError>;

    async fn get(&self, id: Uuid) -> Result<Job, RegistryError>;

    /// All jobs, newest first
    async fn list_all(&self) -> Result<Vec<Job>, RegistryError>;

    /// Records a phase observation
    ///
    /// Only forward moves are applied; an observation of the current phase
    /// refreshes the status detail. Anything else is ignored and the stored
    /// job returned unchanged.
    async fn upsert_phase(
        &self,
        id: Uuid,
        phase: JobPhase,
        detail: Option<String>,
    ) -> Result<Job, RegistryError>;

    async fn attach_handle(&self, id: Uuid, handle: JobHandle) -> Result<Job, RegistryError>;

    /// Appends normalized events, skipping duplicates and anything older
    /// than the newest recorded entry
    ///
    /// # Returns
    /// Number of events actually appended
    async fn append_events(&self, id: Uuid, events: Vec<StatusEvent>) -> Result<usize, RegistryError>;

    /// History in chronological order
    async fn history(&self, id: Uuid) -> Result<Vec<StatusEvent>, RegistryError>;
}

/// Applies a phase observation to a job in place
pub(crate) fn apply_phase(job: &mut Job, phase: JobPhase, detail: Option<String>) -> PhaseChange {
    if job.phase == phase {
        if job.status_detail == detail {
            return PhaseChange::Ignored;
        }
        job.status_detail = detail;
        job.updated_at = Utc::now();
        return PhaseChange::Refreshed;
    }

    if !job.phase.can_advance_to(phase) {
        debug!(
            "Ignoring non-advancing phase {} -> {} for job {}",
            job.phase, phase, job.id
        );
        return PhaseChange::Ignored;
    }

    job.phase = phase;
    job.status_detail = detail;
    job.updated_at = Utc::now();
    PhaseChange::Advanced
}

/// Sets the matching handle fields on a job
pub(crate) fn apply_handle(job: &mut Job, handle: JobHandle) {
    match handle {
        JobHandle::Build(build) => job.build_handle = Some(build),
        JobHandle::Exec(workload) => job.exec_handle = Some(workload),
        JobHandle::Endpoint(endpoint) => job.session = Some(endpoint),
        JobHandle::Session { workload, endpoint } => {
            job.exec_handle = Some(workload);
            job.session = Some(endpoint);
        }
    }
    job.updated_at = Utc::now();
}

/// Merges newly observed events into an append-only history
///
/// # Returns
/// The events that were accepted, in the order they were appended
pub(crate) fn merge_events(existing: &[StatusEvent], mut incoming: Vec<StatusEvent>) -> Vec<StatusEvent> {
    incoming.sort_by_key(|e| e.timestamp);

    let mut newest = existing.last().map(|e| e.timestamp);
    let mut accepted: Vec<StatusEvent> = Vec::new();

    for event in incoming {
        if existing.contains(&event) || accepted.contains(&event) {
            continue;
        }
        if newest.is_some_and(|newest| event.timestamp < newest) {
            debug!(
                "Dropping out-of-order event at {}: {}",
                event.timestamp, event.message
            );
            continue;
        }
        newest = Some(event.timestamp);
        accepted.push(event);
    }

    accepted
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use kiln_core::domain::event::EventLabel;
    use kiln_core::domain::job::{JobKind, Resources};
    use std::collections::{BTreeMap, BTreeSet};

    pub(crate) fn new_job(name: &str) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            name: name.to_string(),
            kind: JobKind::Batch,
            phase: JobPhase::Received,
            status_detail: None,
            entry_file: "Dockerfile".to_string(),
            dependency_hints: BTreeSet::new(),
            resources: Resources::default(),
            env: BTreeMap::new(),
            ttl_seconds: None,
            build_handle: None,
            exec_handle: None,
            session: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn event(secs: i64, label: EventLabel, message: &str) -> StatusEvent {
        StatusEvent {
            timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_700_000_000 + secs),
            label,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_apply_phase_forward_only() {
        let mut job = new_job("train");

        assert_eq!(apply_phase(&mut job, JobPhase::Building, None), PhaseChange::Advanced);
        assert_eq!(
            apply_phase(&mut job, JobPhase::Validating, None),
            PhaseChange::Ignored
        );
        assert_eq!(job.phase, JobPhase::Building);

        assert_eq!(
            apply_phase(&mut job, JobPhase::Building, Some("ContainerCreating".into())),
            PhaseChange::Refreshed
        );
        assert_eq!(job.status_detail.as_deref(), Some("ContainerCreating"));
        assert_eq!(
            apply_phase(&mut job, JobPhase::Building, Some("ContainerCreating".into())),
            PhaseChange::Ignored
        );
    }

    #[test]
    fn test_apply_phase_terminal_is_final() {
        let mut job = new_job("train");
        job.phase = JobPhase::Succeeded;

        for phase in [JobPhase::Running, JobPhase::Failed, JobPhase::Unknown] {
            assert_eq!(apply_phase(&mut job, phase, None), PhaseChange::Ignored);
        }
        assert_eq!(job.phase, JobPhase::Succeeded);
    }

    #[test]
    fn test_apply_handle_session() {
        let mut job = new_job("nb");
        let workload = WorkloadHandle {
            name: "nb-session".to_string(),
            namespace: "default".to_string(),
            uid: None,
        };
        let endpoint = SessionEndpoint {
            service: "nb-session".to_string(),
            host: "nb-session.kiln.local".to_string(),
            url: "http://nb-session.kiln.local/?token=t".to_string(),
            token: "t".to_string(),
            active_deadline_seconds: 60,
        };

        apply_handle(&mut job, JobHandle::Endpoint(endpoint.clone()));
        assert_eq!(job.exec_handle, None);
        assert_eq!(job.session, Some(endpoint.clone()));

        apply_handle(
            &mut job,
            JobHandle::Session {
                workload: workload.clone(),
                endpoint: endpoint.clone(),
            },
        );
        assert_eq!(job.exec_handle, Some(workload));
        assert_eq!(job.session, Some(endpoint));
    }

    #[test]
    fn test_merge_skips_duplicates_and_stale_events() {
        let existing = vec![
            event(10, EventLabel::PullingImage, "Pulling image"),
            event(20, EventLabel::ImagePulled, "Successfully pulled image"),
        ];

        let accepted = merge_events(
            &existing,
            vec![
                event(30, EventLabel::Running, "Started container"),
                event(20, EventLabel::ImagePulled, "Successfully pulled image"),
                event(5, EventLabel::Created, "Created pod"),
                event(30, EventLabel::Running, "Started container"),
            ],
        );

        assert_eq!(accepted, vec![event(30, EventLabel::Running, "Started container")]);
    }

    #[test]
    fn test_merge_into_empty_history_sorts() {
        let accepted = merge_events(
            &[],
            vec![
                event(2, EventLabel::Running, "Started container"),
                event(1, EventLabel::Created, "Created pod"),
            ],
        );
        let labels: Vec<_> = accepted.iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![EventLabel::Created, EventLabel::Running]);
    }
}
