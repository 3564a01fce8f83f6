//! Job query endpoints

use crate::KilnClient;
use crate::error::Result;
use kiln_core::domain::job::Job;
use kiln_core::dto::job::{JobHistory, JobList, JobLogs, JobSummary};
use kiln_core::dto::upload::HealthResponse;
use uuid::Uuid;

impl KilnClient {
    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let response = self.client.get(self.url("/jobs")).send().await?;

        let list: JobList = self.handle_response(response).await?;
        Ok(list.jobs)
    }

    /// Get a job by ID
    ///
    /// # Returns
    /// The full job, including the session endpoint of interactive jobs
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}", job_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Chronological status history of a job
    pub async fn job_history(&self, job_id: Uuid) -> Result<JobHistory> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}/history", job_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Logs of the job's most recent execution unit
    pub async fn job_logs(&self, job_id: Uuid) -> Result<JobLogs> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}/logs", job_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;

        self.handle_response(response).await
    }
}
