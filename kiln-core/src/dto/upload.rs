//! Upload DTOs for the HTTP surface

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Response of `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    /// Name of the build workload submitted for this upload
    pub build_job: String,
    /// Image the build will push
    pub image: String,
    pub message: String,
}

/// Response of `POST /detect_libs`
///
/// Keyed by entry file name, then by dependency marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectLibsResponse {
    pub results: BTreeMap<String, BTreeMap<String, bool>>,
}

/// Response of the health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
