//! Error taxonomy shared across the HTTP boundary

use serde::{Deserialize, Serialize};

/// Category of a failure, as reported to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad upload or request. Not retried.
    Validation,
    /// The build executor or orchestrator rejected a spec. Not retried.
    Submission,
    /// Network or auth failure talking to an external system. Retry with backoff.
    TransientInfra,
    /// Unknown job or expired handle
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientInfra)
    }
}

/// Structured error payload returned by every failing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub error: String,
}
