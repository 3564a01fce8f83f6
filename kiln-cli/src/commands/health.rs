//! Health command handler

use anyhow::{Context, Result};
use colored::*;
use kiln_client::KilnClient;

use crate::config::Config;

pub async fn handle_health(config: &Config) -> Result<()> {
    let client = KilnClient::new(&config.server_url);

    let health = client
        .health()
        .await
        .with_context(|| format!("Server at {} is not reachable", config.server_url))?;

    println!(
        "{} {} ({}, up since {})",
        "✓".green(),
        config.server_url,
        health.status,
        health.started_at.format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}
