//! Kiln CLI
//!
//! Command-line interface for submitting bundles to a Kiln server and
//! following the resulting jobs.

mod commands;
mod config;
mod id_resolver;
mod pack;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build and run container bundles on a cluster", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(long, env = "KILN_SERVER_URL", default_value = "http://localhost:8080")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        server_url: cli.server_url,
    };

    handle_command(cli.command, &config).await
}
