//! Job Service
//!
//! Drives a job through its lifecycle: ingest, build, launch, observe.
//! State is advanced on read: every status query polls the cluster, applies
//! what it saw to the registry and returns the merged result.

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::BuildOutcome;
use crate::config::WorkspaceRetention;
use crate::repository::{JobHandle, JobRegistry, RegistryError};
use crate::service::build::{BuildCoordinator, BuildError};
use crate::service::ingest::{ArtifactIngestor, IngestError};
use crate::service::launch::{LaunchError, WorkloadLauncher};
use crate::service::lifecycle::{LifecycleError, LifecycleTracker, WorkloadState};
use kiln_core::domain::bundle::DependencyReport;
use kiln_core::domain::handle::{BuildHandle, ImageRef, WorkloadHandle};
use kiln_core::domain::job::{Job, JobKind, JobPhase, Resources};
use kiln_core::dto::job::{JobHistory, JobLogs};
use kiln_core::error::ErrorKind;

/// Status detail recorded when a workload disappeared from the cluster
pub const EXPIRED_DETAIL: &str = "Expired";

/// Status detail prefix while a build waits for the cluster to come back
pub const BUILD_PENDING_DETAIL: &str = "Build submission pending";

const MAX_NAME_LEN: usize = 255;

/// Service error type
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("job {job_id}: {source}")]
    Build { job_id: Uuid, source: BuildError },

    #[error("job {job_id}: {source}")]
    Launch { job_id: Uuid, source: LaunchError },

    #[error("job {job_id}: {source}")]
    Lifecycle { job_id: Uuid, source: LifecycleError },

    #[error("job {0} has no workload yet")]
    NoWorkload(Uuid),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Validation(_) => ErrorKind::Validation,
            JobError::Ingest(IngestError::Io(_)) => ErrorKind::Internal,
            JobError::Ingest(_) => ErrorKind::Validation,
            JobError::Build { source, .. } => match source {
                BuildError::Submission(_) => ErrorKind::Submission,
                BuildError::Unavailable(_) => ErrorKind::TransientInfra,
                BuildError::HandleNotFound(_) => ErrorKind::NotFound,
            },
            JobError::Launch { source, .. } => match source {
                LaunchError::Rejected(_) => ErrorKind::Submission,
                LaunchError::Unavailable(_) => ErrorKind::TransientInfra,
            },
            JobError::Lifecycle { source, .. } => match source {
                LifecycleError::OrchestratorUnavailable(_) => ErrorKind::TransientInfra,
                LifecycleError::HandleNotFound(_) | LifecycleError::NoUnits(_) => {
                    ErrorKind::NotFound
                }
            },
            JobError::NoWorkload(_) => ErrorKind::NotFound,
            JobError::Registry(RegistryError::NotFound(_)) => ErrorKind::NotFound,
            JobError::Registry(_) => ErrorKind::Internal,
        }
    }
}

/// A bundle submission as received from a client
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_name: String,
    pub archive: Vec<u8>,
    pub kind: JobKind,
    pub resources: Resources,
    pub env: BTreeMap<String, String>,
    pub ttl_seconds: Option<u64>,
}

impl Submission {
    pub fn validate(&self) -> Result<(), String> {
        let name = self.job_name.trim();
        if name.is_empty() {
            return Err("job_name is required".to_string());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(format!("job_name must be at most {} characters", MAX_NAME_LEN));
        }

        self.resources.validate()?;

        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(format!("invalid environment variable name '{}'", key));
        }

        Ok(())
    }
}

/// Per-job async locks
///
/// Serializes every read-modify-write of one job, so two concurrent refreshes
/// can never both observe a finished build and launch twice. Gates of
/// terminal jobs are dropped; such jobs are only ever read.
#[derive(Default)]
pub struct JobGates {
    gates: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobGates {
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        gate.lock_owned().await
    }

    pub fn forget(&self, id: Uuid) {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistorySync {
    /// Failures are logged; the phase update still counts
    BestEffort,
    Required,
}

pub struct JobService {
    registry: Arc<dyn JobRegistry>,
    ingestor: ArtifactIngestor,
    builds: BuildCoordinator,
    launcher: WorkloadLauncher,
    tracker: LifecycleTracker,
    retention: WorkspaceRetention,
    gates: JobGates,
}

impl JobService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        ingestor: ArtifactIngestor,
        builds: BuildCoordinator,
        launcher: WorkloadLauncher,
        tracker: LifecycleTracker,
        retention: WorkspaceRetention,
    ) -> Self {
        Self {
            registry,
            ingestor,
            builds,
            launcher,
            tracker,
            retention,
            gates: JobGates::default(),
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Ingests a bundle, records the job and submits its image build
    ///
    /// Nothing is recorded when the bundle is invalid. Once recorded, a
    /// rejected build leaves the job in `BuildFailed` and is still returned
    /// as an error. If the cluster cannot be reached the error is transient:
    /// the job stays in `Validating` and the next refresh submits the build.
    pub async fn submit(&self, submission: Submission) -> Result<Job, JobError> {
        submission.validate().map_err(JobError::Validation)?;

        let bundle = self.ingestor.ingest(submission.archive).await?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            upload_id: bundle.upload_id,
            name: submission.job_name.trim().to_string(),
            kind: submission.kind,
            phase: JobPhase::Received,
            status_detail: None,
            entry_file: bundle.entry_file_str(),
            dependency_hints: bundle.dependency_hints,
            resources: submission.resources,
            env: submission.env,
            ttl_seconds: submission
                .ttl_seconds
                .or(self.launcher.default_ttl_seconds()),
            build_handle: None,
            exec_handle: None,
            session: None,
            created_at: now,
            updated_at: now,
        };

        let _gate = self.gates.acquire(job.id).await;
        let job = self.registry.create(job).await?;
        info!("Job {} ({}) received from upload {}", job.id, job.name, job.upload_id);

        let job = self
            .registry
            .upsert_phase(job.id, JobPhase::Validating, None)
            .await?;

        let id = job.id;
        let submitted = self.submit_build(job).await;
        if let Err(JobError::Build { source, .. }) = &submitted {
            if !matches!(source, BuildError::Unavailable(_)) {
                self.gates.forget(id);
            }
        }
        submitted
    }

    async fn submit_build(&self, job: Job) -> Result<Job, JobError> {
        match self.builds.submit(&job).await {
            Ok(handle) => {
                info!("Build {} submitted for job {}", handle.workload, job.id);
                self.registry
                    .attach_handle(job.id, JobHandle::Build(handle))
                    .await?;
                Ok(self
                    .registry
                    .upsert_phase(job.id, JobPhase::Building, None)
                    .await?)
            }
            Err(source @ BuildError::Unavailable(_)) => {
                warn!("Build submission for job {} deferred: {}", job.id, source);
                self.registry
                    .upsert_phase(
                        job.id,
                        JobPhase::Validating,
                        Some(format!("{}: {}", BUILD_PENDING_DETAIL, source)),
                    )
                    .await?;
                Err(JobError::Build {
                    job_id: job.id,
                    source,
                })
            }
            Err(source) => {
                error!("Build submission for job {} failed: {}", job.id, source);
                self.registry
                    .upsert_phase(job.id, JobPhase::BuildFailed, Some(source.to_string()))
                    .await?;
                self.release_workspace(&job).await;
                Err(JobError::Build {
                    job_id: job.id,
                    source,
                })
            }
        }
    }

    /// Reports which dependency markers a bundle's entry file mentions
    pub async fn detect(&self, archive: Vec<u8>) -> Result<DependencyReport, JobError> {
        Ok(self.ingestor.inspect(archive).await?)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current state of one job, refreshed from the cluster
    pub async fn get(&self, id: Uuid) -> Result<Job, JobError> {
        self.refresh(id, HistorySync::BestEffort).await
    }

    /// All jobs, newest first
    ///
    /// Non-terminal jobs are refreshed concurrently. A job that cannot be
    /// refreshed is listed with its last recorded state.
    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        let jobs = self.registry.list_all().await?;

        let refreshed = join_all(jobs.into_iter().map(|job| async move {
            if job.phase.is_terminal() {
                return job;
            }
            match self.refresh(job.id, HistorySync::BestEffort).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Failed to refresh job {}: {}", job.id, e);
                    job
                }
            }
        }))
        .await;

        Ok(refreshed)
    }

    /// Chronological history of one job
    pub async fn history(&self, id: Uuid) -> Result<JobHistory, JobError> {
        let job = self.refresh(id, HistorySync::Required).await?;
        let history = self.registry.history(id).await?;

        Ok(JobHistory {
            job_id: job.id,
            job_name: job.name,
            phase: job.phase,
            history,
        })
    }

    /// Logs of the job's most recent execution unit
    ///
    /// Falls back to the build workload while nothing has been launched.
    pub async fn logs(&self, id: Uuid) -> Result<JobLogs, JobError> {
        let job = self.registry.get(id).await?;

        let handle = job
            .exec_handle
            .as_ref()
            .or(job.build_handle.as_ref().map(|b| &b.workload))
            .ok_or(JobError::NoWorkload(id))?;

        let (unit, logs) = self
            .tracker
            .logs(handle)
            .await
            .map_err(|source| JobError::Lifecycle { job_id: id, source })?;

        Ok(JobLogs {
            job_id: id,
            unit,
            logs,
        })
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    async fn refresh(&self, id: Uuid, history: HistorySync) -> Result<Job, JobError> {
        let _gate = self.gates.acquire(id).await;

        let job = self.registry.get(id).await?;
        if job.phase.is_terminal() {
            self.gates.forget(id);
            return Ok(job);
        }

        let job = if let Some(exec) = job.exec_handle.clone() {
            self.observe_run(job, &exec).await?
        } else if let Some(build) = job.build_handle.clone() {
            self.observe_build(job, &build).await?
        } else if matches!(job.phase, JobPhase::Received | JobPhase::Validating) {
            self.submit_build(job).await?
        } else {
            job
        };

        match self.sync_history(&job).await {
            Ok(()) => {}
            Err(e) if history == HistorySync::BestEffort => {
                warn!("Failed to sync history of job {}: {}", job.id, e);
            }
            Err(e) => return Err(e),
        }

        if job.phase.is_terminal() {
            self.gates.forget(id);
        }
        Ok(job)
    }

    async fn observe_build(&self, job: Job, build: &BuildHandle) -> Result<Job, JobError> {
        match self.builds.poll(build).await {
            Ok(BuildOutcome::Pending) => {
                let detail = match self.tracker.observe(&build.workload).await {
                    Ok(state) => state.detail(),
                    Err(e) => {
                        debug!("No unit detail for build {}: {}", build.workload, e);
                        job.status_detail.clone()
                    }
                };
                Ok(self
                    .registry
                    .upsert_phase(job.id, JobPhase::Building, detail)
                    .await?)
            }
            Ok(BuildOutcome::Failed(reason)) => {
                warn!("Build for job {} failed: {}", job.id, reason);
                self.release_workspace(&job).await;
                Ok(self
                    .registry
                    .upsert_phase(job.id, JobPhase::BuildFailed, Some(reason))
                    .await?)
            }
            Ok(BuildOutcome::Succeeded(image)) => {
                info!("Build for job {} pushed {}", job.id, image);
                self.release_workspace(&job).await;
                self.launch(job, &image).await
            }
            Err(BuildError::HandleNotFound(_)) => self.mark_expired(job).await,
            Err(source) => Err(JobError::Build {
                job_id: job.id,
                source,
            }),
        }
    }

    async fn launch(&self, job: Job, image: &ImageRef) -> Result<Job, JobError> {
        let job = self
            .registry
            .upsert_phase(job.id, JobPhase::Launching, None)
            .await?;

        let launched = match job.kind {
            JobKind::Batch => self.launcher.launch(&job, image).await.map(JobHandle::Exec),
            JobKind::Interactive => {
                let endpoint = match job.session.clone() {
                    Some(endpoint) => endpoint,
                    None => {
                        let endpoint = self.launcher.plan_session(&job);
                        self.registry
                            .attach_handle(job.id, JobHandle::Endpoint(endpoint.clone()))
                            .await?;
                        endpoint
                    }
                };
                self.launcher
                    .launch_session(&job, image, &endpoint)
                    .await
                    .map(|workload| JobHandle::Session { workload, endpoint })
            }
        };

        match launched {
            Ok(handle) => {
                info!("Job {} launched", job.id);
                Ok(self.registry.attach_handle(job.id, handle).await?)
            }
            // Submission adopts what an earlier attempt created; the next
            // refresh retries.
            Err(source @ LaunchError::Unavailable(_)) => Err(JobError::Launch {
                job_id: job.id,
                source,
            }),
            Err(source) => {
                error!("Launch of job {} rejected: {}", job.id, source);
                self.registry
                    .upsert_phase(job.id, JobPhase::Failed, Some(source.to_string()))
                    .await?;
                Err(JobError::Launch {
                    job_id: job.id,
                    source,
                })
            }
        }
    }

    async fn observe_run(&self, job: Job, exec: &WorkloadHandle) -> Result<Job, JobError> {
        let state = match self.tracker.observe(exec).await {
            Ok(state) => state,
            Err(LifecycleError::HandleNotFound(_)) => return self.mark_expired(job).await,
            Err(source) => {
                return Err(JobError::Lifecycle {
                    job_id: job.id,
                    source,
                });
            }
        };

        let phase = match state {
            WorkloadState::Pending { .. } => JobPhase::Launching,
            WorkloadState::Running { .. } => JobPhase::Running,
            WorkloadState::Succeeded => JobPhase::Succeeded,
            WorkloadState::Failed { .. } => JobPhase::Failed,
        };

        let updated = self
            .registry
            .upsert_phase(job.id, phase, state.detail())
            .await?;
        if updated.phase != job.phase {
            info!("Job {} is now {}", job.id, updated.phase);
        }
        Ok(updated)
    }

    /// Keeps the last known phase and marks the job's workload as gone
    async fn mark_expired(&self, job: Job) -> Result<Job, JobError> {
        info!("Workload of job {} no longer exists", job.id);
        Ok(self
            .registry
            .upsert_phase(job.id, job.phase, Some(EXPIRED_DETAIL.to_string()))
            .await?)
    }

    async fn sync_history(&self, job: &Job) -> Result<(), JobError> {
        let handles: Vec<&WorkloadHandle> = job
            .build_handle
            .as_ref()
            .map(|b| &b.workload)
            .into_iter()
            .chain(job.exec_handle.as_ref())
            .collect();
        if handles.is_empty() {
            return Ok(());
        }

        let events = self
            .tracker
            .history(&handles)
            .await
            .map_err(|source| JobError::Lifecycle {
                job_id: job.id,
                source,
            })?;

        let appended = self.registry.append_events(job.id, events).await?;
        if appended > 0 {
            debug!("Recorded {} new events for job {}", appended, job.id);
        }
        Ok(())
    }

    async fn release_workspace(&self, job: &Job) {
        if self.retention != WorkspaceRetention::RemoveAfterBuild {
            return;
        }
        if let Err(e) = self.ingestor.release(job.upload_id).await {
            warn!("Failed to remove workspace of job {}: {}", job.id, e);
        }
    }
}
