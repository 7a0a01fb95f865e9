//! Partition routing inspection

use anyhow::{Context, Result};
use cascade_lib::{Granularity, Grouping, Partitioner, PipelineConfig, StreamKey};
use colored::Colorize;
use serde::Serialize;

use crate::output::{print_json, OutputFormat};

/// Where a key lands within one stage
#[derive(Debug, Serialize)]
struct RouteResult {
    key: String,
    granularity: Granularity,
    grouping: Grouping,
    workers: usize,
    worker: usize,
}

/// Show the worker a stream key routes to
pub fn show_route(
    account: &str,
    metric: &str,
    criteria: &[String],
    granularity: Granularity,
    workers: Option<usize>,
    grouping: Option<Grouping>,
    format: OutputFormat,
) -> Result<()> {
    let key = StreamKey::new(account, metric, parse_criteria(criteria)?);
    let result = route(&key, granularity, workers, grouping)?;

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            println!("{}", "Route".bold());
            println!("{}", "=".repeat(60));
            println!("Key:       {}", result.key.cyan());
            println!("Tier:      {}", result.granularity);
            println!("Grouping:  {}", result.grouping);
            println!("Workers:   {}", result.workers);
            println!(
                "Worker:    {}",
                format!("worker-{}", result.worker).green().bold()
            );
        }
    }

    Ok(())
}

fn route(
    key: &StreamKey,
    granularity: Granularity,
    workers: Option<usize>,
    grouping: Option<Grouping>,
) -> Result<RouteResult> {
    let defaults = PipelineConfig::default();
    let partitioner = Partitioner::new(
        workers.unwrap_or_else(|| defaults.parallelism_for(granularity)),
        grouping.unwrap_or_else(|| defaults.grouping_for(granularity)),
    )
    .context("Invalid partitioner settings")?;

    Ok(RouteResult {
        key: key.canonical(),
        granularity,
        grouping: partitioner.grouping(),
        workers: partitioner.workers(),
        worker: partitioner.route(key).0,
    })
}

/// Parse `KEY=VALUE` criteria arguments
fn parse_criteria(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => anyhow::bail!("Invalid criteria '{}', expected KEY=VALUE", entry),
        })
        .collect()
}
