//! Upload API Handlers
//!
//! Multipart endpoints that receive bundle archives.

use axum::{
    Json,
    extract::{Multipart, State},
};
use kiln_core::domain::job::{JobKind, Resources};
use kiln_core::dto::upload::{DetectLibsResponse, UploadResponse};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::job::Submission;

/// Field names the archive may arrive under
const ARCHIVE_FIELDS: [&str; 2] = ["file", "folder"];

#[derive(Debug, Default)]
struct UploadForm {
    archive: Option<Vec<u8>>,
    job_name: Option<String>,
    kind: JobKind,
    resources: Resources,
    env: BTreeMap<String, String>,
    ttl_seconds: Option<u64>,
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> ApiResult<T> {
    value.trim().parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "{} must be a non-negative integer, got '{}'",
            field,
            value.trim()
        ))
    })
}

async fn read_upload_form(multipart: &mut Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            n if ARCHIVE_FIELDS.contains(&n) => {
                form.archive = Some(field.bytes().await?.to_vec());
            }
            "job_name" => form.job_name = Some(field.text().await?),
            "job_type" => {
                form.kind = field
                    .text()
                    .await?
                    .trim()
                    .to_lowercase()
                    .parse()
                    .map_err(ApiError::BadRequest)?;
            }
            "cpu" => form.resources.cpu = parse_number("cpu", &field.text().await?)?,
            "memory" => form.resources.memory_gb = parse_number("memory", &field.text().await?)?,
            "gpu" => form.resources.gpu = parse_number("gpu", &field.text().await?)?,
            "ttl_seconds" => {
                form.ttl_seconds = Some(parse_number("ttl_seconds", &field.text().await?)?);
            }
            "env" => {
                let entry = field.text().await?;
                let (key, value) = entry.split_once('=').ok_or_else(|| {
                    ApiError::BadRequest(format!("env entry '{}' is not KEY=VALUE", entry))
                })?;
                form.env.insert(key.trim().to_string(), value.to_string());
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    Ok(form)
}

/// POST /upload
/// Ingest a bundle and submit its image build
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let form = read_upload_form(&mut multipart).await?;

    let archive = form
        .archive
        .ok_or_else(|| ApiError::BadRequest("missing archive field 'file'".to_string()))?;
    let job_name = form
        .job_name
        .ok_or_else(|| ApiError::BadRequest("job_name is required".to_string()))?;

    tracing::info!(
        "Received upload for job '{}' ({} bytes)",
        job_name,
        archive.len()
    );

    let job = state
        .jobs
        .submit(Submission {
            job_name,
            archive,
            kind: form.kind,
            resources: form.resources,
            env: form.env,
            ttl_seconds: form.ttl_seconds,
        })
        .await?;

    let build = job.build_handle.as_ref().ok_or_else(|| {
        ApiError::InternalError(format!("job {} was accepted without a build", job.id))
    })?;

    Ok(Json(UploadResponse {
        upload_id: job.upload_id,
        job_id: job.id,
        job_name: job.name.clone(),
        build_job: build.workload.name.clone(),
        image: build.image.push.clone(),
        message: format!("Build submitted for job '{}'", job.name),
    }))
}

/// POST /detect_libs
/// Report which known libraries a bundle's entry file mentions
pub async fn detect_libs(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<DetectLibsResponse>> {
    let mut archive = None;

    while let Some(field) = multipart.next_field().await? {
        let is_archive = field.name().is_some_and(|n| ARCHIVE_FIELDS.contains(&n));
        if is_archive {
            archive = Some(field.bytes().await?.to_vec());
        }
    }

    let archive =
        archive.ok_or_else(|| ApiError::BadRequest("missing archive field 'file'".to_string()))?;

    let report = state.jobs.detect(archive).await?;

    Ok(Json(DetectLibsResponse {
        results: BTreeMap::from([(report.entry_file_name, report.markers)]),
    }))
}
