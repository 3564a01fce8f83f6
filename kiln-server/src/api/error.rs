//! API Error Handling
//!
//! Every failing endpoint answers with an `ErrorBody`: the error kind and a
//! human readable message.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kiln_core::error::{ErrorBody, ErrorKind};

use crate::service::job::JobError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Rejected while reading the request body; carries its own status
    Multipart(MultipartError),
    Service(JobError),
    InternalError(String),
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Submission => StatusCode::BAD_GATEWAY,
        ErrorKind::TransientInfra => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorKind::Validation, msg),
            ApiError::Multipart(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!("Failed to read multipart body: {}", err);
                    (status, ErrorKind::Internal, "Internal server error".to_string())
                } else if status == StatusCode::PAYLOAD_TOO_LARGE {
                    (status, ErrorKind::Validation, err.body_text())
                } else {
                    (
                        status,
                        ErrorKind::Validation,
                        format!("malformed multipart body: {}", err.body_text()),
                    )
                }
            }
            ApiError::Service(err) => {
                let kind = err.kind();
                let message = match kind {
                    ErrorKind::Internal => {
                        tracing::error!("Internal error: {}", err);
                        "Internal server error".to_string()
                    }
                    ErrorKind::TransientInfra => {
                        tracing::warn!("Cluster unavailable: {}", err);
                        err.to_string()
                    }
                    _ => err.to_string(),
                };
                (status_for(kind), kind, message)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Internal,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            kind,
            error: message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        ApiError::Service(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
