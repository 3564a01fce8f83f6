//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod health;
mod job;
mod submit;

pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;
use kiln_core::domain::job::JobKind;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pack a folder and submit it as a new job
    Submit {
        /// Folder containing the Dockerfile
        folder: PathBuf,

        /// Display name of the job
        job_name: String,

        /// batch or interactive
        #[arg(long, default_value = "batch", value_parser = parse_kind)]
        kind: JobKind,

        /// Seconds to keep finished workloads around
        #[arg(long)]
        ttl: Option<u64>,

        /// CPU cores (1-64)
        #[arg(long)]
        cpu: Option<u32>,

        /// Memory in GiB (1-256)
        #[arg(long)]
        memory: Option<u32>,

        /// GPU count (0-8)
        #[arg(long)]
        gpu: Option<u32>,

        /// Environment variables as KEY=VALUE pairs
        #[arg(short, long, value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Report which known libraries a folder's Dockerfile installs
    Detect {
        folder: PathBuf,
    },
    /// Job inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Check that the server is up
    Health,
}

fn parse_kind(s: &str) -> Result<JobKind, String> {
    s.trim().to_lowercase().parse()
}

/// Parse a single KEY=VALUE pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        anyhow::bail!("invalid KEY=VALUE: empty key in `{}`", s);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Submit {
            folder,
            job_name,
            kind,
            ttl,
            cpu,
            memory,
            gpu,
            env,
        } => {
            let options = submit::SubmitOptions {
                kind,
                ttl_seconds: ttl,
                cpu,
                memory_gb: memory,
                gpu,
                env,
            };
            submit::handle_submit(config, &folder, job_name, options).await
        }
        Commands::Detect { folder } => submit::handle_detect(config, &folder).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Health => health::handle_health(config).await,
    }
}
