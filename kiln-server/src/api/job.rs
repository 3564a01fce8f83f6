//! Job API Handlers
//!
//! Read endpoints. Each call re-derives the job's state from the cluster
//! before answering.

use axum::{
    Json,
    extract::{Path, State},
};
use kiln_core::domain::job::Job;
use kiln_core::dto::job::{JobHistory, JobList, JobLogs, JobSummary};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /jobs
/// List all jobs, newest first
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<JobList>> {
    tracing::debug!("Listing all jobs");

    let jobs = state.jobs.list().await?;

    Ok(Json(JobList {
        jobs: jobs.iter().map(JobSummary::from).collect(),
    }))
}

/// GET /jobs/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(state.jobs.get(id).await?))
}

/// GET /jobs/{id}/history
pub async fn get_job_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobHistory>> {
    tracing::debug!("Getting history for job: {}", id);

    Ok(Json(state.jobs.history(id).await?))
}

/// GET /jobs/{id}/logs
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobLogs>> {
    tracing::debug!("Getting logs for job: {}", id);

    Ok(Json(state.jobs.logs(id).await?))
}
