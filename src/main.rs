//! Fleetseed - unified CLI entrypoint.
//!
//! Usage:
//!   fleetseed seed --snapshot fleet.json --config config/fleetseed.toml
//!   fleetseed plan --snapshot fleet.json --format raw
//!   fleetseed watch --topic 'vehicle/+/status,facility/#'

use anyhow::Result;
use clap::Parser;
use fleetseed::cli::commands::{run_plan, run_seed, run_watch};
use fleetseed::cli::{Cli, Commands};
use fleetseed::config::Config;
use fleetseed::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    let _log = init_tracing(
        &cli.log_level(&config.telemetry),
        cli.log_format(&config.telemetry),
    )?;

    match cli.command {
        Commands::Seed(args) => run_seed(args, config).await,
        Commands::Plan(args) => run_plan(args),
        Commands::Watch(args) => run_watch(args, config).await,
    }
}
