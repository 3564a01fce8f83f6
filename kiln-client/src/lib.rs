//! Kiln HTTP Client
//!
//! A type-safe HTTP client for the Kiln server API, used by the CLI.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::KilnClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kiln_client::ClientError> {
//!     let client = KilnClient::new("http://localhost:8080");
//!
//!     for job in client.list_jobs().await? {
//!         println!("{} {:?}", job.name, job.phase);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod uploads;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use uploads::UploadRequest;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Kiln server API
///
/// Methods are grouped by concern:
/// - Uploads and dependency detection
/// - Job queries (list, details, history, logs)
/// - Health check
#[derive(Debug, Clone)]
pub struct KilnClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl KilnClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server API
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// Use this to configure timeouts, proxies or TLS settings.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = KilnClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = KilnClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/jobs"), "http://localhost:8080/jobs");
    }
}
