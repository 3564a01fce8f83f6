//! Health Check API Handler

use axum::{Json, extract::State};
use kiln_core::dto::upload::HealthResponse;

use crate::api::AppState;

/// GET / and GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        started_at: state.started_at,
    })
}
