//! Upload endpoints

use crate::KilnClient;
use crate::error::Result;
use kiln_core::domain::job::JobKind;
use kiln_core::dto::upload::{DetectLibsResponse, UploadResponse};
use reqwest::multipart::{Form, Part};

const ARCHIVE_FILE_NAME: &str = "bundle.zip";

/// A zipped bundle and the options to submit it with
///
/// Unset resources fall back to the server defaults.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub job_name: String,
    pub archive: Vec<u8>,
    pub kind: JobKind,
    pub cpu: Option<u32>,
    pub memory_gb: Option<u32>,
    pub gpu: Option<u32>,
    pub ttl_seconds: Option<u64>,
    /// `KEY=VALUE` pairs for the run container
    pub env: Vec<(String, String)>,
}

fn archive_part(archive: Vec<u8>) -> Result<Part> {
    Ok(Part::bytes(archive)
        .file_name(ARCHIVE_FILE_NAME)
        .mime_str("application/zip")?)
}

impl UploadRequest {
    fn into_form(self) -> Result<Form> {
        let mut form = Form::new()
            .text("job_name", self.job_name)
            .text("job_type", self.kind.as_str().to_string());

        let numbers = [
            ("cpu", self.cpu.map(u64::from)),
            ("memory", self.memory_gb.map(u64::from)),
            ("gpu", self.gpu.map(u64::from)),
            ("ttl_seconds", self.ttl_seconds),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                form = form.text(name, value.to_string());
            }
        }

        for (key, value) in self.env {
            form = form.text("env", format!("{}={}", key, value));
        }

        Ok(form.part("folder", archive_part(self.archive)?))
    }
}

impl KilnClient {
    /// Upload a bundle and start its build
    ///
    /// # Returns
    /// The ids of the new upload and job, and the build that was submitted
    pub async fn upload(&self, req: UploadRequest) -> Result<UploadResponse> {
        tracing::debug!(
            "Uploading '{}' ({} bytes)",
            req.job_name,
            req.archive.len()
        );

        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(req.into_form()?)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Report which known libraries a bundle's entry file mentions
    pub async fn detect_libs(&self, archive: Vec<u8>) -> Result<DetectLibsResponse> {
        let form = Form::new().part("file", archive_part(archive)?);

        let response = self
            .client
            .post(self.url("/detect_libs"))
            .multipart(form)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
