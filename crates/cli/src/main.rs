//! Metric Cascade CLI
//!
//! A command-line tool for replaying sample fixtures through the cascade,
//! inspecting partition routing and querying a running agent.

mod client;
mod commands;
mod output;

use anyhow::Result;
use cascade_lib::{Granularity, Grouping};
use clap::{Parser, Subcommand};
use commands::{replay, route, status};
use std::path::PathBuf;

/// Metric Cascade CLI
#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "CLI for the Metric Cascade", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via CASCADE_API_URL env var)
    #[arg(long, env = "CASCADE_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a JSON lines sample fixture through an in-process cascade
    Replay {
        /// Fixture file, one sample record per line
        file: PathBuf,

        /// Samples per stream before anomalies are reported
        #[arg(long)]
        warmup: Option<u64>,

        /// Excursions suppressed after an anomaly fires
        #[arg(long)]
        cooldown: Option<u32>,

        /// Only print anomalous aggregates
        #[arg(long)]
        anomalies_only: bool,

        /// Only print aggregates of this tier
        #[arg(long, short)]
        granularity: Option<Granularity>,
    },

    /// Show which worker a stream key routes to
    Route {
        /// Account id of the stream
        #[arg(long)]
        account: String,

        /// Metric name of the stream
        #[arg(long)]
        metric: String,

        /// Criteria entries as key=value (repeatable)
        #[arg(long = "criteria", value_name = "KEY=VALUE")]
        criteria: Vec<String>,

        /// Tier whose default worker count and grouping apply
        #[arg(long, default_value = "raw")]
        granularity: Granularity,

        /// Worker count (defaults to the tier's parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Grouping: key, metric or global (defaults to the tier's grouping)
        #[arg(long)]
        grouping: Option<Grouping>,
    },

    /// Show agent health
    Health,

    /// Show agent pipeline statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            warmup,
            cooldown,
            anomalies_only,
            granularity,
        } => {
            let options = replay::ReplayOptions {
                warmup,
                cooldown,
                anomalies_only,
                granularity,
                verbose: cli.verbose,
            };
            replay::run_replay(&file, options, cli.format).await?;
        }
        Commands::Route {
            account,
            metric,
            criteria,
            granularity,
            workers,
            grouping,
        } => {
            route::show_route(
                &account,
                &metric,
                &criteria,
                granularity,
                workers,
                grouping,
                cli.format,
            )?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_health(&client, cli.format).await?;
        }
        Commands::Stats => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_stats(&client, cli.format).await?;
        }
    }

    Ok(())
}
