//! Job command handlers
//!
//! Handles listing jobs, viewing details, history and logs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use kiln_client::KilnClient;
use kiln_core::domain::event::{EventLabel, StatusEvent};
use kiln_core::domain::job::{Job, JobPhase};
use kiln_core::dto::job::JobSummary;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List all jobs
    List,
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show the status history of a job
    History {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Get logs of the job's latest run
    Logs {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = KilnClient::new(&config.server_url);

    match command {
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::History { id } => get_job_history(&client, &id).await,
        JobCommands::Logs { id } => get_job_logs(&client, &id).await,
    }
}

async fn list_jobs(client: &KilnClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    Ok(())
}

async fn get_job(client: &KilnClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let job = client.get_job(uuid).await?;
    print_job_details(&job);

    Ok(())
}

async fn get_job_history(client: &KilnClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let history = client.job_history(uuid).await?;

    println!(
        "{} {} ({})",
        "History of".bold(),
        history.job_name.bold(),
        colorize_phase(history.phase)
    );
    if history.history.is_empty() {
        println!("{}", "  No events recorded yet.".yellow());
    }
    for event in &history.history {
        print_event(event);
    }

    Ok(())
}

async fn get_job_logs(client: &KilnClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let logs = client.job_logs(uuid).await?;

    if logs.logs.is_empty() {
        println!("{}", format!("No logs yet from {}.", logs.unit).yellow());
    } else {
        println!("{}", format!("Logs from {}:", logs.unit).bold());
        println!("{}", "─".repeat(80).dimmed());
        print!("{}", logs.logs);
        if !logs.logs.ends_with('\n') {
            println!();
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_job_summary(job: &JobSummary) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        job.name.bold(),
        job.id.to_string().dimmed()
    );
    match &job.status_detail {
        Some(detail) => println!("    Status:  {} ({})", colorize_phase(job.phase), detail),
        None => println!("    Status:  {}", colorize_phase(job.phase)),
    }
    println!("    Kind:    {}", job.kind.as_str());
    println!("    Created: {}", format_time(&job.created_at).dimmed());
    println!();
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Name:        {}", job.name);
    println!("  Kind:        {}", job.kind.as_str());
    println!("  Status:      {}", colorize_phase(job.phase));
    if let Some(detail) = &job.status_detail {
        println!("  Detail:      {}", detail.yellow());
    }
    println!("  Upload ID:   {}", job.upload_id.to_string().dimmed());
    println!("  Entry file:  {}", job.entry_file);
    println!(
        "  Resources:   {} CPU, {} GiB, {} GPU",
        job.resources.cpu, job.resources.memory_gb, job.resources.gpu
    );
    if let Some(ttl) = job.ttl_seconds {
        println!("  TTL:         {}s", ttl);
    }
    println!("  Created:     {}", format_time(&job.created_at));
    println!("  Updated:     {}", format_time(&job.updated_at));

    if !job.dependency_hints.is_empty() {
        let hints: Vec<&str> = job.dependency_hints.iter().map(String::as_str).collect();
        println!("  Libraries:   {}", hints.join(", "));
    }

    if let Some(build) = &job.build_handle {
        println!("\n{}", "Build:".bold());
        println!("  Workload: {}", build.workload);
        println!("  Image:    {}", build.image.pull);
    }

    if let Some(exec) = &job.exec_handle {
        println!("\n{}", "Run:".bold());
        println!("  Workload: {}", exec);
    }

    if let Some(session) = &job.session {
        println!("\n{}", "Session:".bold());
        println!("  URL:      {}", session.url.cyan());
        println!("  Expires:  after {}s", session.active_deadline_seconds);
    }

    if !job.env.is_empty() {
        println!("\n{}", "Environment:".bold());
        for (key, value) in &job.env {
            println!("  {} = {}", key.cyan(), value);
        }
    }
}

fn print_event(event: &StatusEvent) {
    let label = event.label.as_str();
    let label_colored = match event.label {
        EventLabel::Complete => label.green(),
        EventLabel::Error | EventLabel::BackOff => label.red(),
        EventLabel::Running => label.cyan(),
        EventLabel::Created | EventLabel::PullingImage | EventLabel::ImagePulled => label.normal(),
    };

    println!(
        "  {} {:<12} {}",
        format_time(&event.timestamp).dimmed(),
        label_colored,
        event.message
    );
}

fn colorize_phase(phase: JobPhase) -> ColoredString {
    let text = phase.as_str();
    match phase {
        JobPhase::Unknown | JobPhase::Received | JobPhase::Validating => text.dimmed(),
        JobPhase::Building | JobPhase::Launching => text.yellow(),
        JobPhase::Running => text.cyan(),
        JobPhase::Succeeded => text.green(),
        JobPhase::BuildFailed | JobPhase::Failed => text.red(),
    }
}
