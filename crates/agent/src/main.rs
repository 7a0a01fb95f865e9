//! Cascade Agent - streaming metric statistics service
//!
//! Reads metric samples as JSON lines, folds them through the granularity
//! cascade, appends persisted aggregates to a JSON lines file and reports
//! anomalies as structured log events.

use anyhow::{Context, Result};
use cascade_lib::{
    health::{components, ComponentHealth, HealthRegistry},
    JsonlPersistenceSink, LogNotificationSink, Pipeline, PipelineMetrics, SinkFanout,
    StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod input;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cascade-agent");

    let config = config::AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        output = %config.output_path.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::TOPOLOGY).await;
    health_registry.register(components::PERSISTENCE_SINK).await;
    health_registry.register(components::NOTIFICATION_SINK).await;

    let metrics = PipelineMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let persistence = JsonlPersistenceSink::open(&config.output_path)
        .await
        .with_context(|| format!("Failed to open {}", config.output_path.display()))?;
    let sinks = SinkFanout::new(
        Arc::new(persistence),
        Arc::new(LogNotificationSink::new(logger.clone())),
        config.pipeline.persist_granularities.iter().copied(),
        config.pipeline.sink.clone(),
    );

    let mut pipeline = Pipeline::start(
        &config.pipeline,
        Arc::new(sinks),
        metrics,
        logger,
        health_registry.clone(),
    )
    .context("Failed to start pipeline")?;

    let app_state = Arc::new(api::AppState::new(
        config.instance_name.clone(),
        health_registry.clone(),
        pipeline.source(),
        pipeline.handle(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (sample_tx, sample_rx) = mpsc::channel(config.pipeline.channel_capacity);
    let reader = tokio::spawn(input::read_samples(config.input_path.clone(), sample_tx));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received");
            let _ = shutdown_tx.send(());
        }
    });

    health_registry.set_ready(true).await;

    let exit = pipeline.run(sample_rx, shutdown_rx).await;

    health_registry.set_ready(false).await;
    health_registry
        .update(
            components::SOURCE,
            ComponentHealth::from_source_stats(&pipeline.stats()),
        )
        .await;

    let stats = pipeline.shutdown(exit).await?;
    info!(
        emitted = stats.emitted,
        acked = stats.acked,
        redelivered = stats.redelivered,
        dead_lettered = stats.dead_lettered,
        in_flight = stats.in_flight,
        "Pipeline stopped"
    );

    api_handle.abort();
    if reader.is_finished() {
        reader
            .await
            .context("Sample reader panicked")?
            .context("Sample reader failed")?;
    } else {
        reader.abort();
    }

    Ok(())
}
