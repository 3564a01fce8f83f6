//! API Module
//!
//! HTTP API layer for the Kiln server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod upload;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::job::JobService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub started_at: DateTime<Utc>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        // Health check
        .route("/", get(health::health_check))
        .route("/health", get(health::health_check))
        // Upload endpoints
        .route("/upload", post(upload::upload))
        .route("/upload/", post(upload::upload))
        .route("/detect_libs", post(upload::detect_libs))
        // Job endpoints
        .route("/jobs", get(job::list_jobs))
        .route("/jobs/{id}", get(job::get_job))
        .route("/jobs/{id}/history", get(job::get_job_history))
        .route("/jobs/{id}/logs", get(job::get_job_logs))
        // Add state and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
