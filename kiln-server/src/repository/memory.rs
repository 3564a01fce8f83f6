//! In-memory job registry
//!
//! Jobs live in a map of per-job slots. Writers lock only the slot of the job
//! they touch; readers never wait on writers of other jobs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use super::{
    JobHandle, JobRegistry, RegistryError, apply_handle, apply_phase, merge_events,
};
use kiln_core::domain::event::StatusEvent;
use kiln_core::domain::job::{Job, JobPhase};

struct JobRecord {
    job: Job,
    history: Vec<StatusEvent>,
}

#[derive(Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<RwLock<JobRecord>>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Result<Arc<RwLock<JobRecord>>, RegistryError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut JobRecord) -> T) -> Result<T, RegistryError> {
        let slot = self.slot(id)?;
        let mut record = slot.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut record))
    }

    fn read<T>(&self, id: Uuid, f: impl FnOnce(&JobRecord) -> T) -> Result<T, RegistryError> {
        let slot = self.slot(id)?;
        let record = slot.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&record))
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create(&self, job: Job) -> Result<Job, RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::Conflict(job.id));
        }
        jobs.insert(
            job.id,
            Arc::new(RwLock::new(JobRecord {
                job: job.clone(),
                history: Vec::new(),
            })),
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job, RegistryError> {
        self.read(id, |record| record.job.clone())
    }

    async fn list_all(&self) -> Result<Vec<Job>, RegistryError> {
        let slots: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut jobs: Vec<Job> = slots
            .iter()
            .map(|slot| {
                slot.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .job
                    .clone()
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn upsert_phase(
        &self,
        id: Uuid,
        phase: JobPhase,
        detail: Option<String>,
    ) -> Result<Job, RegistryError> {
        self.update(id, |record| {
            apply_phase(&mut record.job, phase, detail);
            record.job.clone()
        })
    }

    async fn attach_handle(&self, id: Uuid, handle: JobHandle) -> Result<Job, RegistryError> {
        self.update(id, |record| {
            apply_handle(&mut record.job, handle);
            record.job.clone()
        })
    }

    async fn append_events(&self, id: Uuid, events: Vec<StatusEvent>) -> Result<usize, RegistryError> {
        self.update(id, |record| {
            let accepted = merge_events(&record.history, events);
            let count = accepted.len();
            record.history.extend(accepted);
            count
        })
    }

    async fn history(&self, id: Uuid) -> Result<Vec<StatusEvent>, RegistryError> {
        self.read(id, |record| record.history.clone())
    }
}
