//! kubectl-backed orchestrator
//!
//! Drives the cluster by shelling out to `kubectl` with JSON in and out:
//! - Checking kubectl availability at startup
//! - Creating jobs, services and ingresses from rendered manifests
//! - Reading pods, job conditions, events and logs
//!
//! Every invocation is bounded by the configured timeout; the child process is
//! killed when the timeout fires.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::manifest::{UNIT_SELECTOR_LABEL, endpoint_manifest, job_manifest};
use super::naming::same_owner;
use super::wire::{EventList, JobObject, PodList};
use super::{ClusterError, ClusterEvent, Conditions, EndpointSpec, Orchestrator, Unit, WorkloadSpec};
use crate::config::ClusterSettings;
use kiln_core::domain::handle::WorkloadHandle;

/// Checks that the kubectl binary can be executed
pub async fn check_kubectl_available(binary: &str) -> Result<(), ClusterError> {
    let output = Command::new(binary)
        .arg("version")
        .arg("--client")
        .output()
        .await
        .map_err(|e| {
            ClusterError::Unavailable(format!(
                "failed to execute '{} version --client': {}. Is kubectl installed?",
                binary, e
            ))
        })?;

    if !output.status.success() {
        return Err(ClusterError::Unavailable(format!(
            "{} is not working correctly",
            binary
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("kubectl is available: {}", version.trim().replace('\n', ", "));

    Ok(())
}

/// Orchestrator implementation over the kubectl CLI
pub struct KubectlOrchestrator {
    binary: String,
    namespace: String,
    context: Option<String>,
    timeout: Duration,
}

impl KubectlOrchestrator {
    pub fn new(settings: &ClusterSettings) -> Self {
        Self {
            binary: settings.kubectl.clone(),
            namespace: settings.namespace.clone(),
            context: settings.context.clone(),
            timeout: settings.timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("--namespace").arg(&self.namespace);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs one kubectl invocation and returns its stdout
    ///
    /// # Arguments
    /// * `args` - Arguments after the global flags
    /// * `stdin` - Document piped to the process, if any
    async fn run(&self, args: &[&str], stdin: Option<Vec<u8>>) -> Result<String, ClusterError> {
        let verb = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");

        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let execution = async {
            let mut child = cmd.spawn()?;
            if let Some(input) = stdin {
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(&input).await?;
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, execution)
            .await
            .map_err(|_| {
                ClusterError::Unavailable(format!(
                    "kubectl {} timed out after {}s",
                    verb,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClusterError::Unavailable(format!("failed to execute {}: {}", self.binary, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("kubectl {} stderr: {}", verb, stderr.trim());
        }

        if !output.status.success() {
            let error = classify_failure(stderr.trim());
            warn!("kubectl {} failed: {}", verb, error);
            return Err(error);
        }

        Ok(stdout)
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, ClusterError> {
        let stdout = self.run(args, None).await?;
        parse_output(&stdout)
    }

    async fn create(&self, manifest: serde_json::Value) -> Result<String, ClusterError> {
        let document = serde_json::to_vec(&manifest)
            .map_err(|e| ClusterError::Rejected(format!("failed to render manifest: {}", e)))?;
        self.run(&["create", "-f", "-", "-o", "json"], Some(document))
            .await
    }

    async fn apply(&self, manifest: serde_json::Value) -> Result<String, ClusterError> {
        let document = serde_json::to_vec(&manifest)
            .map_err(|e| ClusterError::Rejected(format!("failed to render manifest: {}", e)))?;
        self.run(&["apply", "-f", "-", "-o", "json"], Some(document))
            .await
    }

    /// Takes over a workload a previous, unconfirmed submission created
    ///
    /// Only objects stamped with the same job id are adopted.
    async fn adopt(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, ClusterError> {
        let existing: JobObject = self
            .run_json(&["get", "job", &spec.name, "-o", "json"])
            .await?;

        if !same_owner(&spec.labels, &existing.metadata.labels) {
            return Err(ClusterError::AlreadyExists(format!(
                "job {} exists and belongs to another job",
                spec.name
            )));
        }

        info!("Adopting existing workload {}", spec.name);
        Ok(WorkloadHandle {
            name: spec.name.clone(),
            namespace: self.namespace.clone(),
            uid: existing.metadata.uid,
        })
    }
}


fn parse_output<T: DeserializeOwned>(stdout: &str) -> Result<T, ClusterError> {
    serde_json::from_str(stdout)
        .map_err(|e| ClusterError::Unavailable(format!("unexpected kubectl output: {}", e)))
}

/// Maps kubectl's stderr to an error category
///
/// Missing objects are `NotFound` and name collisions `AlreadyExists`;
/// connectivity, auth and server-side throttling are `Unavailable`; anything
/// else means the request itself was refused.
pub fn classify_failure(stderr: &str) -> ClusterError {
    const UNAVAILABLE_MARKERS: [&str; 10] = [
        "Unable to connect",
        "connection refused",
        "i/o timeout",
        "TLS handshake",
        "no such host",
        "Unauthorized",
        "Forbidden",
        "ServiceUnavailable",
        "the server is currently unable",
        "TooManyRequests",
    ];

    let message = if stderr.is_empty() {
        "kubectl exited with an error".to_string()
    } else {
        stderr.to_string()
    };

    if stderr.contains("(NotFound)") || stderr.contains(" not found") {
        ClusterError::NotFound(message)
    } else if stderr.contains("(AlreadyExists)") || stderr.contains(" already exists") {
        ClusterError::AlreadyExists(message)
    } else if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
        ClusterError::Unavailable(message)
    } else {
        ClusterError::Rejected(message)
    }
}

#[async_trait]
impl Orchestrator for KubectlOrchestrator {
    async fn submit_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, ClusterError> {
        info!("Submitting workload {} to namespace {}", spec.name, self.namespace);

        let stdout = match self.create(job_manifest(spec, &self.namespace)).await {
            Ok(stdout) => stdout,
            Err(ClusterError::AlreadyExists(_)) => return self.adopt(spec).await,
            Err(e) => return Err(e),
        };
        let created: JobObject = parse_output(&stdout)?;

        Ok(WorkloadHandle {
            name: spec.name.clone(),
            namespace: self.namespace.clone(),
            uid: created.metadata.uid,
        })
    }

    async fn list_units(&self, handle: &WorkloadHandle) -> Result<Vec<Unit>, ClusterError> {
        let selector = format!("{}={}", UNIT_SELECTOR_LABEL, handle.name);
        let pods: PodList = self
            .run_json(&["get", "pods", "-l", &selector, "-o", "json"])
            .await?;
        Ok(pods.items.into_iter().map(Unit::from).collect())
    }

    async fn get_conditions(&self, handle: &WorkloadHandle) -> Result<Conditions, ClusterError> {
        let job: JobObject = self
            .run_json(&["get", "job", &handle.name, "-o", "json"])
            .await?;

        if let (Some(expected), Some(actual)) = (&handle.uid, &job.metadata.uid) {
            if expected != actual {
                // Same name, different object: ours is gone.
                return Err(ClusterError::NotFound(format!(
                    "job {} was replaced (uid {} != {})",
                    handle, actual, expected
                )));
            }
        }

        Ok(Conditions::from(job.status))
    }

    async fn get_events(&self, handle: &WorkloadHandle) -> Result<Vec<ClusterEvent>, ClusterError> {
        let events: EventList = self.run_json(&["get", "events", "-o", "json"]).await?;
        Ok(events
            .items
            .into_iter()
            .filter(|event| event.concerns(&handle.name))
            .filter_map(|event| event.into_cluster_event())
            .collect())
    }

    async fn get_logs(&self, _handle: &WorkloadHandle, unit: &Unit) -> Result<String, ClusterError> {
        self.run(&["logs", &unit.name, "--all-containers=true"], None)
            .await
    }

    async fn expose(&self, spec: &EndpointSpec) -> Result<(), ClusterError> {
        info!("Exposing {} at {}", spec.name, spec.host);
        let stdout = self
            .apply(endpoint_manifest(spec, &self.namespace))
            .await?;
        // Output is a List; only confirm it parses.
        let _: serde_json::Value = parse_output(&stdout)?;
        Ok(())
    }
}
