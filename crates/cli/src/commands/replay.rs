//! Offline replay of sample fixtures through an in-process cascade

use anyhow::{Context, Result};
use cascade_lib::{
    Granularity, HealthRegistry, MemorySink, MetricAggregate, MetricSample, Pipeline,
    PipelineConfig, PipelineMetrics, SampleRecord, SinkFanout, SourceStats, StageCensus,
    StructuredLogger,
};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;
use tokio::sync::{broadcast, mpsc};

use crate::output::{
    color_severity, format_timestamp, format_value, print_info, print_json, print_rows,
    print_success, print_warning, OutputFormat,
};

pub struct ReplayOptions {
    pub warmup: Option<u64>,
    pub cooldown: Option<u32>,
    pub anomalies_only: bool,
    pub granularity: Option<Granularity>,
    pub verbose: bool,
}

/// Row for the aggregates table
#[derive(Tabled)]
struct AggregateRow {
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Std Dev")]
    std_dev: String,
    #[tabled(rename = "Z")]
    z_score: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "N")]
    samples: u64,
}

impl From<&MetricAggregate> for AggregateRow {
    fn from(aggregate: &MetricAggregate) -> Self {
        Self {
            tier: aggregate.granularity.to_string(),
            key: aggregate.key.canonical(),
            time: format_timestamp(aggregate.timestamp),
            value: format_value(aggregate.value),
            mean: format_value(aggregate.mean),
            std_dev: format_value(aggregate.std_dev),
            z_score: format_value(aggregate.z_score),
            severity: color_severity(aggregate.severity),
            samples: aggregate.sample_count,
        }
    }
}

/// Per-tier totals of a replay
#[derive(Debug, Clone, Serialize, Tabled)]
struct TierSummary {
    #[tabled(rename = "Tier")]
    tier: Granularity,
    #[tabled(rename = "Streams")]
    streams: usize,
    #[tabled(rename = "Aggregates")]
    aggregates: usize,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
}

/// Everything a replay produced
#[derive(Debug, Serialize)]
struct ReplayOutcome {
    samples: usize,
    skipped: usize,
    source: SourceStats,
    summary: Vec<TierSummary>,
    aggregates: Vec<MetricAggregate>,
}

/// Replay a fixture file and print its aggregates
pub async fn run_replay(path: &Path, options: ReplayOptions, format: OutputFormat) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;

    let (samples, skipped) = parse_fixture(&content, options.verbose);
    let config = replay_config(&options);
    if options.verbose {
        print_info(&format!(
            "Replaying {} samples (warmup {}, cooldown {})",
            samples.len(),
            config.engine.warmup_samples,
            config.engine.snooze_cooldown
        ));
    }

    let mut outcome = replay(samples, &config).await?;
    outcome.skipped = skipped;
    outcome.aggregates.retain(|a| {
        (!options.anomalies_only || a.is_anomaly)
            && options.granularity.map_or(true, |g| a.granularity == g)
    });

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Table => {
            println!("{}", "Replay".bold());
            println!("{}", "=".repeat(60));
            println!("Fixture:  {}", path.display().to_string().cyan());
            println!("Samples:  {}", outcome.samples);
            if outcome.skipped > 0 {
                print_warning(&format!("{} malformed line(s) skipped", outcome.skipped));
            }
            println!();

            let rows: Vec<AggregateRow> = outcome.aggregates.iter().map(AggregateRow::from).collect();
            print_rows(rows, &outcome.aggregates, format);
            println!();
            print_rows(outcome.summary.clone(), &outcome.summary, format);

            print_success(&format!(
                "{} unit(s) acked, {} dead-lettered",
                outcome.source.acked, outcome.source.dead_lettered
            ));
        }
    }

    Ok(())
}

/// Parse fixture lines; returns the samples and the number of malformed lines
fn parse_fixture(content: &str, verbose: bool) -> (Vec<MetricSample>, usize) {
    let mut samples = Vec::new();
    let mut skipped = 0;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SampleRecord>(line) {
            Ok(record) => samples.push(MetricSample::from(record)),
            Err(e) => {
                skipped += 1;
                if verbose {
                    print_warning(&format!("line {}: {}", index + 1, e));
                }
            }
        }
    }

    (samples, skipped)
}

/// Pipeline configuration for a replay: every tier recorded
fn replay_config(options: &ReplayOptions) -> PipelineConfig {
    let mut config = PipelineConfig {
        persist_granularities: Granularity::ALL.into_iter().collect(),
        ..Default::default()
    };
    if let Some(warmup) = options.warmup {
        config.engine.warmup_samples = warmup;
    }
    if let Some(cooldown) = options.cooldown {
        config.engine.snooze_cooldown = cooldown;
    }
    config
}

/// Drive `samples` through a fresh cascade until every unit settles
async fn replay(samples: Vec<MetricSample>, config: &PipelineConfig) -> Result<ReplayOutcome> {
    let recorder = Arc::new(MemorySink::new());
    let sinks = SinkFanout::new(
        recorder.clone(),
        recorder.clone(),
        config.persist_granularities.iter().copied(),
        config.sink.clone(),
    );
    let mut pipeline = Pipeline::start(
        config,
        Arc::new(sinks),
        PipelineMetrics::new(),
        StructuredLogger::new("cascade-cli"),
        HealthRegistry::new(),
    )
    .context("Failed to start pipeline")?;

    let total = samples.len();
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let feeder = tokio::spawn(async move {
        for sample in samples {
            if tx.send(sample).await.is_err() {
                break;
            }
        }
    });

    let exit = pipeline.run(rx, shutdown_rx).await;
    feeder.await.context("Sample feeder failed")?;
    let census = pipeline.handle().census().await?;
    let source = pipeline.shutdown(exit).await?;

    let mut aggregates = recorder.persisted().await;
    aggregates.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.granularity.cmp(&b.granularity))
            .then_with(|| a.key.canonical().cmp(&b.key.canonical()))
    });

    Ok(ReplayOutcome {
        samples: total,
        skipped: 0,
        source,
        summary: summarize(&census, &aggregates),
        aggregates,
    })
}

fn summarize(census: &[StageCensus], aggregates: &[MetricAggregate]) -> Vec<TierSummary> {
    census
        .iter()
        .map(|stage| {
            let tier = aggregates.iter().filter(|a| a.granularity == stage.granularity);
            TierSummary {
                tier: stage.granularity,
                streams: stage.states,
                aggregates: tier.clone().count(),
                anomalies: tier.filter(|a| a.is_anomaly).count(),
            }
        })
        .collect()
}
