//! Build Coordination
//!
//! Derives the image reference for an upload and hands the build to the
//! executor.

use std::sync::Arc;
use thiserror::Error;

use crate::cluster::naming::{ResourceNames, workload_labels};
use crate::cluster::{BuildExecutor, BuildOutcome, BuildSpec, ClusterError, RegistryTrust};
use crate::config::BuildSettings;
use kiln_core::domain::handle::{BuildHandle, ImageRef};
use kiln_core::domain::job::Job;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The executor refused the build spec
    #[error("build submission rejected: {0}")]
    Submission(String),

    #[error("build executor unavailable: {0}")]
    Unavailable(String),

    /// The build workload no longer exists
    #[error("build {0} no longer exists")]
    HandleNotFound(String),
}

impl From<ClusterError> for BuildError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Rejected(msg) | ClusterError::AlreadyExists(msg) => {
                BuildError::Submission(msg)
            }
            ClusterError::Unavailable(msg) => BuildError::Unavailable(msg),
            ClusterError::NotFound(msg) => BuildError::HandleNotFound(msg),
        }
    }
}

pub struct BuildCoordinator {
    executor: Arc<dyn BuildExecutor>,
    registry_push: String,
    registry_pull: String,
    trust: RegistryTrust,
}

impl BuildCoordinator {
    pub fn new(executor: Arc<dyn BuildExecutor>, settings: &BuildSettings) -> Self {
        Self {
            executor,
            registry_push: settings.registry_push.trim_end_matches('/').to_string(),
            registry_pull: settings.registry_pull.trim_end_matches('/').to_string(),
            trust: RegistryTrust {
                insecure: settings.registry_insecure,
                docker_config_secret: settings.registry_secret.clone(),
            },
        }
    }

    /// Image reference for an upload; a pure function of name and upload id
    pub fn image_for(&self, job_name: &str, upload_id: Uuid) -> ImageRef {
        let names = ResourceNames::new(job_name, upload_id);
        let repository = names.image_repository();
        ImageRef {
            push: format!("{}/{}:latest", self.registry_push, repository),
            pull: format!("{}/{}:latest", self.registry_pull, repository),
        }
    }

    /// Build request for a recorded job; a pure function of the job
    pub fn spec_for(&self, job: &Job) -> BuildSpec {
        let names = ResourceNames::new(&job.name, job.upload_id);

        BuildSpec {
            name: names.build(),
            labels: workload_labels(job.id),
            context_dir: job.upload_id.to_string(),
            entry_file: job.entry_file.clone(),
            destination: self.image_for(&job.name, job.upload_id),
            trust: self.trust.clone(),
            ttl_seconds: job.ttl_seconds,
        }
    }

    /// Submits the image build for a job whose bundle was ingested
    ///
    /// Safe to repeat: a build an earlier attempt created is adopted.
    pub async fn submit(&self, job: &Job) -> Result<BuildHandle, BuildError> {
        Ok(self.executor.submit(&self.spec_for(job)).await?)
    }

    pub async fn poll(&self, handle: &BuildHandle) -> Result<BuildOutcome, BuildError> {
        Ok(self.executor.poll(handle).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl BuildExecutor for NoopExecutor {
        async fn submit(&self, _spec: &BuildSpec) -> Result<BuildHandle, ClusterError> {
            Err(ClusterError::Rejected("not used".to_string()))
        }

        async fn poll(&self, _handle: &BuildHandle) -> Result<BuildOutcome, ClusterError> {
            Ok(BuildOutcome::Pending)
        }
    }

    #[test]
    fn test_image_reference_is_deterministic() {
        let mut settings = Config::default().build;
        settings.registry_push = "registry.svc:5000/".to_string();
        settings.registry_pull = "localhost:5000".to_string();
        let coordinator = BuildCoordinator::new(Arc::new(NoopExecutor), &settings);

        let upload = Uuid::new_v4();
        let image = coordinator.image_for("My Job", upload);

        assert_eq!(image, coordinator.image_for("My Job", upload));
        assert_eq!(image.push, format!("registry.svc:5000/my-job-{}:latest", upload));
        assert_eq!(image.pull, format!("localhost:5000/my-job-{}:latest", upload));
    }

    #[test]
    fn test_build_spec_is_derived_from_job() {
        let coordinator = BuildCoordinator::new(Arc::new(NoopExecutor), &Config::default().build);
        let mut job = crate::repository::tests::new_job("Train");
        job.entry_file = "app/Dockerfile".to_string();
        job.ttl_seconds = Some(60);

        let spec = coordinator.spec_for(&job);

        assert_eq!(spec, coordinator.spec_for(&job));
        assert_eq!(spec.name, format!("train-{}-build", job.upload_id));
        assert_eq!(spec.context_dir, job.upload_id.to_string());
        assert_eq!(spec.entry_file, "app/Dockerfile");
        assert_eq!(spec.destination, coordinator.image_for("Train", job.upload_id));
        assert_eq!(spec.labels, workload_labels(job.id));
        assert_eq!(spec.ttl_seconds, Some(60));
    }

    #[test]
    fn test_cluster_errors_map_to_build_errors() {
        assert!(matches!(
            BuildError::from(ClusterError::Rejected("x".into())),
            BuildError::Submission(_)
        ));
        assert!(matches!(
            BuildError::from(ClusterError::Unavailable("x".into())),
            BuildError::Unavailable(_)
        ));
        assert!(matches!(
            BuildError::from(ClusterError::NotFound("x".into())),
            BuildError::HandleNotFound(_)
        ));
        assert!(matches!(
            BuildError::from(ClusterError::AlreadyExists("x".into())),
            BuildError::Submission(_)
        ));
    }
}
