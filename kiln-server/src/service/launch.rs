//! Workload Launching
//!
//! Turns a built image into a running workload: a run-to-completion batch job,
//! or an interactive session with its own endpoint and access token.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cluster::naming::{ResourceNames, SESSION_LABEL, slug, workload_labels};
use crate::cluster::{
    ClusterError, ContainerSpec, EndpointSpec, Orchestrator, VolumeMount, VolumeSource,
    WorkloadSpec,
};
use crate::config::{LaunchSettings, MIN_TOKEN_LEN};
use kiln_core::domain::handle::{ImageRef, SessionEndpoint, WorkloadHandle};
use kiln_core::domain::job::Job;

const RESULTS_VOLUME: &str = "results";

/// Environment variables carrying the session token into the container
const TOKEN_ENV_VARS: [&str; 2] = ["KILN_SESSION_TOKEN", "JUPYTER_TOKEN"];

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch rejected: {0}")]
    Rejected(String),

    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

impl From<ClusterError> for LaunchError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Rejected(msg)
            | ClusterError::AlreadyExists(msg)
            | ClusterError::NotFound(msg) => LaunchError::Rejected(msg),
            ClusterError::Unavailable(msg) => LaunchError::Unavailable(msg),
        }
    }
}

/// Random alphanumeric token from the OS generator
///
/// Lengths below the minimum are raised to it.
pub fn generate_token(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len.max(MIN_TOKEN_LEN))
        .map(char::from)
        .collect()
}

pub struct WorkloadLauncher {
    orchestrator: Arc<dyn Orchestrator>,
    settings: LaunchSettings,
}

impl WorkloadLauncher {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, settings: LaunchSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    /// TTL applied to finished workloads when a job does not set one
    pub fn default_ttl_seconds(&self) -> Option<u64> {
        self.settings.default_ttl_seconds
    }

    fn workload_spec(
        &self,
        job: &Job,
        image: &ImageRef,
        name: String,
        env: BTreeMap<String, String>,
    ) -> WorkloadSpec {
        WorkloadSpec {
            name,
            labels: workload_labels(job.id),
            container: ContainerSpec {
                name: slug(&job.name),
                image: image.pull.clone(),
                args: Vec::new(),
                env,
                ports: Vec::new(),
                resources: Some(job.resources),
                // Tags are reused across builds of the same name.
                always_pull: true,
            },
            volumes: vec![VolumeMount {
                name: RESULTS_VOLUME.to_string(),
                mount_path: self.settings.results_mount.clone(),
                source: VolumeSource::Claim(self.settings.shared_claim.clone()),
            }],
            backoff_limit: Some(self.settings.backoff_limit),
            ttl_seconds_after_finished: job.ttl_seconds.or(self.settings.default_ttl_seconds),
            active_deadline_seconds: None,
            service_account: self.settings.service_account.clone(),
        }
    }

    /// Launches a run-to-completion workload from the built image
    pub async fn launch(&self, job: &Job, image: &ImageRef) -> Result<WorkloadHandle, LaunchError> {
        let names = ResourceNames::new(&job.name, job.upload_id);
        let spec = self.workload_spec(job, image, names.run(), job.env.clone());

        info!("Launching batch workload {} for job {}", spec.name, job.id);

        Ok(self.orchestrator.submit_workload(&spec).await?)
    }

    /// Endpoint and access token for a job's session
    ///
    /// Computed before anything is submitted so that a retried launch reuses
    /// the token already baked into the workload.
    pub fn plan_session(&self, job: &Job) -> SessionEndpoint {
        let name = ResourceNames::new(&job.name, job.upload_id).session();
        let token = generate_token(self.settings.session_token_len);
        let host = format!("{}.{}", name, self.settings.session_domain);

        SessionEndpoint {
            url: format!("http://{}/?token={}", host, token),
            service: name,
            host,
            token,
            active_deadline_seconds: self.settings.session_duration.as_secs(),
        }
    }

    /// Launches a time-bounded interactive session and exposes it
    ///
    /// Both steps are idempotent, so a launch that failed halfway can be
    /// repeated with the same endpoint.
    pub async fn launch_session(
        &self,
        job: &Job,
        image: &ImageRef,
        session: &SessionEndpoint,
    ) -> Result<WorkloadHandle, LaunchError> {
        let name = session.service.clone();

        let mut env = job.env.clone();
        for var in TOKEN_ENV_VARS {
            env.insert(var.to_string(), session.token.clone());
        }

        let mut spec = self.workload_spec(job, image, name.clone(), env);
        spec.labels.insert(SESSION_LABEL.to_string(), name.clone());
        spec.container.ports = vec![self.settings.session_port];
        spec.active_deadline_seconds = Some(session.active_deadline_seconds);

        info!("Launching session {} for job {}", name, job.id);
        let handle = self.orchestrator.submit_workload(&spec).await?;

        let endpoint = EndpointSpec {
            name: name.clone(),
            labels: workload_labels(job.id),
            selector: BTreeMap::from([(SESSION_LABEL.to_string(), name)]),
            port: self.settings.session_port,
            host: session.host.clone(),
        };
        self.orchestrator.expose(&endpoint).await?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeOrchestrator;
    use crate::config::Config;
    use chrono::Utc;
    use kiln_core::domain::job::{JobKind, JobPhase, Resources};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn job(kind: JobKind) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            name: "notebook".to_string(),
            kind,
            phase: JobPhase::Launching,
            status_detail: None,
            entry_file: "Dockerfile".to_string(),
            dependency_hints: BTreeSet::new(),
            resources: Resources {
                cpu: 2,
                memory_gb: 8,
                gpu: 1,
            },
            env: BTreeMap::from([("MODE".to_string(), "train".to_string())]),
            ttl_seconds: Some(300),
            build_handle: None,
            exec_handle: None,
            session: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn image() -> ImageRef {
        ImageRef {
            push: "push:5000/notebook:latest".to_string(),
            pull: "pull:5000/notebook:latest".to_string(),
        }
    }

    #[test]
    fn test_token_length_and_alphabet() {
        let token = generate_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        assert_eq!(generate_token(4).len(), MIN_TOKEN_LEN);
        assert_ne!(generate_token(32), generate_token(32));
    }

    #[tokio::test]
    async fn test_batch_launch_spec() {
        let fake = Arc::new(FakeOrchestrator::new());
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);
        let job = job(JobKind::Batch);

        let handle = launcher.launch(&job, &image()).await.unwrap();
        let spec = fake.submitted(&handle.name).unwrap();

        assert!(handle.name.ends_with("-run"));
        assert_eq!(spec.container.image, "pull:5000/notebook:latest");
        assert!(spec.container.always_pull);
        assert_eq!(spec.container.env.get("MODE").map(String::as_str), Some("train"));
        assert_eq!(spec.container.resources, Some(job.resources));
        assert_eq!(spec.volumes[0].mount_path, "/mnt");
        assert_eq!(spec.backoff_limit, Some(4));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        assert_eq!(spec.active_deadline_seconds, None);
        assert!(fake.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_session_launch_exposes_endpoint_with_token() {
        let fake = Arc::new(FakeOrchestrator::new());
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);
        let job = job(JobKind::Interactive);

        let session = launcher.plan_session(&job);
        let handle = launcher.launch_session(&job, &image(), &session).await.unwrap();
        let spec = fake.submitted(&handle.name).unwrap();

        assert!(handle.name.ends_with("-session"));
        assert_eq!(session.service, handle.name);
        assert_eq!(spec.active_deadline_seconds, Some(4 * 60 * 60));
        assert_eq!(spec.container.ports, vec![8888]);
        assert_eq!(spec.container.env.get("JUPYTER_TOKEN"), Some(&session.token));
        assert!(session.token.len() >= MIN_TOKEN_LEN);
        assert!(session.url.contains(&session.token));
        assert_eq!(session.host, format!("{}.kiln.local", handle.name));

        let endpoints = fake.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].selector.get(SESSION_LABEL), Some(&handle.name));
        assert_eq!(spec.labels.get(SESSION_LABEL), Some(&handle.name));
    }

    #[tokio::test]
    async fn test_session_launch_can_be_repeated_after_expose_failure() {
        let fake = Arc::new(FakeOrchestrator::new());
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);
        let job = job(JobKind::Interactive);
        let session = launcher.plan_session(&job);

        fake.fail_next_expose();
        let err = launcher
            .launch_session(&job, &image(), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Unavailable(_)));
        assert!(fake.endpoints().is_empty());

        let handle = launcher.launch_session(&job, &image(), &session).await.unwrap();
        assert_eq!(fake.submitted_names(), vec![handle.name.clone()]);
        assert_eq!(fake.endpoints().len(), 1);
        let spec = fake.submitted(&handle.name).unwrap();
        assert_eq!(spec.container.env.get("KILN_SESSION_TOKEN"), Some(&session.token));
    }

    #[tokio::test]
    async fn test_batch_launch_adopts_workload_after_lost_reply() {
        let fake = Arc::new(FakeOrchestrator::new());
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);
        let job = job(JobKind::Batch);

        fake.lose_next_submit_reply();
        let err = launcher.launch(&job, &image()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Unavailable(_)));

        let handle = launcher.launch(&job, &image()).await.unwrap();
        assert_eq!(fake.submitted_names(), vec![handle.name]);
    }

    #[tokio::test]
    async fn test_name_taken_by_another_job_is_rejected() {
        let fake = Arc::new(FakeOrchestrator::new());
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);
        let first = job(JobKind::Batch);
        let mut second = job(JobKind::Batch);
        second.upload_id = first.upload_id;

        launcher.launch(&first, &image()).await.unwrap();
        let err = launcher.launch(&second, &image()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_rejected_launch() {
        let fake = Arc::new(FakeOrchestrator::new());
        fake.reject_submissions_containing("-run");
        let launcher = WorkloadLauncher::new(fake.clone(), Config::default().launch);

        let err = launcher
            .launch(&job(JobKind::Batch), &image())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Rejected(_)));
    }
}
