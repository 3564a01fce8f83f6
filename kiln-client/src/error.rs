//! Error types for the Kiln client

use kiln_core::error::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Kiln client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        status: u16,
        /// Error kind reported by the server, when the body carried one
        kind: Option<ErrorKind>,
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Builds an API error from a failed response body
    ///
    /// Structured `{"kind", "error"}` bodies are unpacked; anything else is
    /// kept verbatim as the message.
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => Self::ApiError {
                status,
                kind: Some(parsed.kind),
                message: parsed.error,
            },
            Err(_) => Self::ApiError {
                status,
                kind: None,
                message: body,
            },
        }
    }

    /// Server-reported error kind, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::ApiError { kind, .. } => *kind,
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { kind: Some(kind), .. } => kind.is_retryable(),
            Self::ApiError { status, .. } => *status == 503,
            Self::RequestFailed(e) => e.is_connect() || e.is_timeout(),
            Self::ParseError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_body_is_unpacked() {
        let err = ClientError::api_error(
            503,
            r#"{"kind":"transient_infra","error":"cluster unreachable"}"#,
        );

        assert_eq!(err.kind(), Some(ErrorKind::TransientInfra));
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "API error (status 503): cluster unreachable"
        );
    }

    #[test]
    fn test_plain_body_is_kept() {
        let err = ClientError::api_error(400, "Invalid URL: parameter id");
        assert_eq!(err.kind(), None);
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("Invalid URL"));
    }

    #[test]
    fn test_not_found() {
        let err = ClientError::api_error(404, r#"{"kind":"not_found","error":"job x not found"}"#);
        assert!(err.is_not_found());
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }
}
