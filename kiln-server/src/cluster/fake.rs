//! In-process orchestrator for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::naming::same_owner;
use super::{
    ClusterError, ClusterEvent, Conditions, EndpointSpec, Orchestrator, Unit, WorkloadSpec,
};
use kiln_core::domain::handle::WorkloadHandle;

#[derive(Default)]
struct FakeWorkload {
    spec: Option<WorkloadSpec>,
    conditions: Conditions,
    units: Vec<Unit>,
    events: Vec<ClusterEvent>,
    logs: HashMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    workloads: HashMap<String, FakeWorkload>,
    endpoints: Vec<EndpointSpec>,
    reject_fragment: Option<String>,
    unavailable: bool,
    /// The next submission is recorded but reported as timed out
    lose_next_submit_reply: bool,
    fail_next_expose: bool,
}

/// Records submitted workloads and serves scripted state back
#[derive(Default)]
pub struct FakeOrchestrator {
    state: Mutex<FakeState>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse submissions whose name contains `fragment`
    pub fn reject_submissions_containing(&self, fragment: &str) {
        self.state.lock().unwrap().reject_fragment = Some(fragment.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Record the next submission, then fail it as if the reply was lost
    pub fn lose_next_submit_reply(&self) {
        self.state.lock().unwrap().lose_next_submit_reply = true;
    }

    pub fn fail_next_expose(&self) {
        self.state.lock().unwrap().fail_next_expose = true;
    }

    pub fn submitted(&self, name: &str) -> Option<WorkloadSpec> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(name)
            .and_then(|w| w.spec.clone())
    }

    pub fn submitted_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .workloads
            .iter()
            .filter(|(_, w)| w.spec.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn endpoints(&self) -> Vec<EndpointSpec> {
        self.state.lock().unwrap().endpoints.clone()
    }

    pub fn set_conditions(&self, name: &str, conditions: Conditions) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .entry(name.to_string())
            .or_default()
            .conditions = conditions;
    }

    pub fn set_units(&self, name: &str, units: Vec<Unit>) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .entry(name.to_string())
            .or_default()
            .units = units;
    }

    pub fn push_event(&self, name: &str, timestamp: DateTime<Utc>, message: &str) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .entry(name.to_string())
            .or_default()
            .events
            .push(ClusterEvent {
                timestamp,
                object: name.to_string(),
                reason: None,
                message: message.to_string(),
            });
    }

    pub fn set_logs(&self, name: &str, unit: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .entry(name.to_string())
            .or_default()
            .logs
            .insert(unit.to_string(), logs.to_string());
    }

    /// Forget a workload, as if its TTL expired
    pub fn delete(&self, name: &str) {
        self.state.lock().unwrap().workloads.remove(name);
    }

    fn check_available(state: &FakeState) -> Result<(), ClusterError> {
        if state.unavailable {
            Err(ClusterError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_workload<T>(
        &self,
        handle: &WorkloadHandle,
        f: impl FnOnce(&FakeWorkload) -> T,
    ) -> Result<T, ClusterError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        state
            .workloads
            .get(&handle.name)
            .filter(|w| w.spec.is_some())
            .map(f)
            .ok_or_else(|| ClusterError::NotFound(format!("job {} not found", handle.name)))
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn submit_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, ClusterError> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        if let Some(fragment) = &state.reject_fragment {
            if spec.name.contains(fragment.as_str()) {
                return Err(ClusterError::Rejected(format!(
                    "admission webhook denied {}",
                    spec.name
                )));
            }
        }

        let handle = WorkloadHandle {
            name: spec.name.clone(),
            namespace: "default".to_string(),
            uid: Some(format!("uid-{}", spec.name)),
        };

        let workload = state.workloads.entry(spec.name.clone()).or_default();
        if let Some(existing) = &workload.spec {
            if same_owner(&spec.labels, &existing.labels) {
                return Ok(handle);
            }
            return Err(ClusterError::AlreadyExists(format!(
                "jobs.batch \"{}\" already exists",
                spec.name
            )));
        }
        workload.spec = Some(spec.clone());

        if std::mem::take(&mut state.lose_next_submit_reply) {
            return Err(ClusterError::Unavailable(format!(
                "kubectl create {} timed out",
                spec.name
            )));
        }

        Ok(handle)
    }

    async fn list_units(&self, handle: &WorkloadHandle) -> Result<Vec<Unit>, ClusterError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .workloads
            .get(&handle.name)
            .map(|w| w.units.clone())
            .unwrap_or_default())
    }

    async fn get_conditions(&self, handle: &WorkloadHandle) -> Result<Conditions, ClusterError> {
        self.with_workload(handle, |w| w.conditions.clone())
    }

    async fn get_events(&self, handle: &WorkloadHandle) -> Result<Vec<ClusterEvent>, ClusterError> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .workloads
            .get(&handle.name)
            .map(|w| w.events.clone())
            .unwrap_or_default())
    }

    async fn get_logs(&self, handle: &WorkloadHandle, unit: &Unit) -> Result<String, ClusterError> {
        self.with_workload(handle, |w| w.logs.get(&unit.name).cloned())?
            .ok_or_else(|| ClusterError::NotFound(format!("pod {} not found", unit.name)))
    }

    async fn expose(&self, spec: &EndpointSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if std::mem::take(&mut state.fail_next_expose) {
            return Err(ClusterError::Unavailable("ingress admission timed out".to_string()));
        }
        state.endpoints.retain(|e| e.name != spec.name);
        state.endpoints.push(spec.clone());
        Ok(())
    }
}
