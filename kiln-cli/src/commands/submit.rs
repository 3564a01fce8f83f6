//! Submission command handlers
//!
//! Packs a local folder and uploads it, or asks the server which known
//! libraries its Dockerfile installs.

use anyhow::{Context, Result};
use colored::*;
use kiln_client::{KilnClient, UploadRequest};
use kiln_core::domain::job::JobKind;
use std::path::Path;

use crate::config::Config;
use crate::pack::pack_folder;

/// Options forwarded with an upload
pub struct SubmitOptions {
    pub kind: JobKind,
    pub ttl_seconds: Option<u64>,
    pub cpu: Option<u32>,
    pub memory_gb: Option<u32>,
    pub gpu: Option<u32>,
    pub env: Vec<(String, String)>,
}

pub async fn handle_submit(
    config: &Config,
    folder: &Path,
    job_name: String,
    options: SubmitOptions,
) -> Result<()> {
    let client = KilnClient::new(&config.server_url);

    println!("{} {}", "Packing".dimmed(), folder.display());
    let archive = pack_folder(folder).await?;
    println!(
        "{} {} ({} bytes)",
        "Uploading".dimmed(),
        job_name,
        archive.len()
    );

    let response = client
        .upload(UploadRequest {
            job_name,
            archive,
            kind: options.kind,
            cpu: options.cpu,
            memory_gb: options.memory_gb,
            gpu: options.gpu,
            ttl_seconds: options.ttl_seconds,
            env: options.env,
        })
        .await
        .context("Upload failed")?;

    println!("{}", "✓ Job submitted".green().bold());
    println!("  Job ID:    {}", response.job_id.to_string().cyan());
    println!("  Upload ID: {}", response.upload_id.to_string().dimmed());
    println!("  Build:     {}", response.build_job);
    println!("  Image:     {}", response.image);
    println!();
    println!(
        "Follow it with: {}",
        format!("kiln job history {}", &response.job_id.to_string()[..8]).cyan()
    );

    Ok(())
}

pub async fn handle_detect(config: &Config, folder: &Path) -> Result<()> {
    let client = KilnClient::new(&config.server_url);

    let archive = pack_folder(folder).await?;
    let response = client
        .detect_libs(archive)
        .await
        .context("Dependency detection failed")?;

    for (entry_file, markers) in &response.results {
        println!("{}", entry_file.bold());
        for (library, present) in markers {
            let mark = if *present { "✓".green() } else { "✗".dimmed() };
            println!("  {} {}", mark, library);
        }
    }

    Ok(())
}
