//! Kaniko build executor
//!
//! Builds run as ordinary cluster workloads: a kaniko container mounts the
//! shared upload storage, builds from the bundle directory and pushes to the
//! registry. Build status is read back through the orchestrator.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{
    BuildExecutor, BuildOutcome, BuildSpec, ClusterError, ContainerSpec, Orchestrator,
    VolumeMount, VolumeSource, WorkloadSpec,
};
use kiln_core::domain::handle::BuildHandle;

const CONTEXT_VOLUME: &str = "build-context";
const CREDENTIALS_VOLUME: &str = "registry-credentials";
const CREDENTIALS_MOUNT: &str = "/kaniko/.docker";

pub struct KanikoExecutor {
    orchestrator: Arc<dyn Orchestrator>,
    builder_image: String,
    /// Claim holding the upload workspaces
    claim_name: String,
    /// Where the claim is mounted inside the builder
    context_mount: String,
}

impl KanikoExecutor {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        builder_image: String,
        claim_name: String,
        context_mount: String,
    ) -> Self {
        Self {
            orchestrator,
            builder_image,
            claim_name,
            context_mount,
        }
    }

    fn workload_spec(&self, spec: &BuildSpec) -> WorkloadSpec {
        let mount = self.context_mount.trim_end_matches('/');

        let mut args = vec![
            format!("--dockerfile={}", spec.entry_file),
            format!("--context=dir://{}/{}/", mount, spec.context_dir),
            format!("--destination={}", spec.destination.push),
        ];
        if spec.trust.insecure {
            args.push("--insecure".to_string());
            args.push("--skip-tls-verify".to_string());
        }

        let mut volumes = vec![VolumeMount {
            name: CONTEXT_VOLUME.to_string(),
            mount_path: mount.to_string(),
            source: VolumeSource::Claim(self.claim_name.clone()),
        }];
        if let Some(secret) = &spec.trust.docker_config_secret {
            volumes.push(VolumeMount {
                name: CREDENTIALS_VOLUME.to_string(),
                mount_path: CREDENTIALS_MOUNT.to_string(),
                source: VolumeSource::Secret(secret.clone()),
            });
        }

        WorkloadSpec {
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            container: ContainerSpec {
                name: "kaniko".to_string(),
                image: self.builder_image.clone(),
                args,
                env: BTreeMap::new(),
                ports: Vec::new(),
                resources: None,
                always_pull: false,
            },
            volumes,
            // A failed build is a property of the bundle; retrying it only burns time.
            backoff_limit: Some(0),
            ttl_seconds_after_finished: spec.ttl_seconds,
            active_deadline_seconds: None,
            service_account: None,
        }
    }
}

#[async_trait]
impl BuildExecutor for KanikoExecutor {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, ClusterError> {
        info!(
            "Submitting build {} ({} -> {})",
            spec.name, spec.entry_file, spec.destination.push
        );

        let workload = self
            .orchestrator
            .submit_workload(&self.workload_spec(spec))
            .await?;

        Ok(BuildHandle {
            workload,
            image: spec.destination.clone(),
        })
    }

    async fn poll(&self, handle: &BuildHandle) -> Result<BuildOutcome, ClusterError> {
        let conditions = self.orchestrator.get_conditions(&handle.workload).await?;

        Ok(if conditions.complete {
            BuildOutcome::Succeeded(handle.image.clone())
        } else if conditions.failed {
            BuildOutcome::Failed(
                conditions
                    .reason
                    .unwrap_or_else(|| "image build failed".to_string()),
            )
        } else {
            BuildOutcome::Pending
        })
    }
}
