//! Source loop driving samples and redeliveries into the cascade

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::topology::{CascadeHandle, Topology};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::health::{HealthRegistry, PipelineHealth};
use crate::models::MetricSample;
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::reliability::{AckingSource, Delivery, Outcome, Resolution, SourceStats};
use crate::sink::SinkFanout;

/// Why a pipeline run returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Input closed and every unit of work was acked or dead-lettered
    Drained,
    /// Shutdown was signalled; unsettled units remain in flight
    Interrupted,
}

impl RunExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunExit::Drained => "input drained",
            RunExit::Interrupted => "shutdown requested",
        }
    }
}

/// Acknowledging source plus the topology it feeds
pub struct Pipeline {
    source: Arc<AckingSource>,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    topology: Topology,
    logger: StructuredLogger,
}

impl Pipeline {
    /// Start the topology; sink outcomes and worker exits are reported to
    /// `health`
    pub fn start(
        config: &PipelineConfig,
        sinks: Arc<SinkFanout>,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
        health: HealthRegistry,
    ) -> Result<Self> {
        let topology = Topology::start(
            config,
            sinks,
            metrics.clone(),
            logger.clone(),
            PipelineHealth::new(health),
        )?;
        let (source, outcomes) =
            AckingSource::new(config.redelivery.clone(), metrics, logger.clone());

        logger.log_startup(env!("CARGO_PKG_VERSION"), config.total_workers());

        Ok(Self {
            source: Arc::new(source),
            outcomes,
            topology,
            logger,
        })
    }

    pub fn source(&self) -> Arc<AckingSource> {
        self.source.clone()
    }

    pub fn handle(&self) -> CascadeHandle {
        self.topology.handle()
    }

    /// Feed `input` into the cascade and settle every outcome
    ///
    /// Returns once the input is closed and nothing is left in flight, or
    /// when `shutdown` fires. Failed units are redelivered after the
    /// configured delay.
    pub async fn run(
        &mut self,
        mut input: mpsc::Receiver<MetricSample>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RunExit {
        let handle = self.topology.handle();
        let delay = self.source.policy().redelivery_delay();
        let (redeliver_tx, mut redeliver_rx) = mpsc::unbounded_channel::<Delivery>();
        let mut input_open = true;

        loop {
            if !input_open && self.source.pending() == 0 {
                break RunExit::Drained;
            }

            tokio::select! {
                Some(outcome) = self.outcomes.recv() => {
                    if let Resolution::Redeliver(delivery) = self.source.resolve(outcome) {
                        let tx = redeliver_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(delivery);
                        });
                    }
                }
                Some(delivery) = redeliver_rx.recv() => {
                    submit(&handle, delivery).await;
                }
                sample = input.recv(), if input_open => match sample {
                    Some(sample) => submit(&handle, self.source.emit(sample)).await,
                    None => {
                        input_open = false;
                        debug!(in_flight = self.source.pending(), "Input closed, draining");
                    }
                },
                _ = shutdown.recv() => break RunExit::Interrupted,
            }
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.source.stats()
    }

    /// Stop the topology; in-flight units are left unacknowledged
    pub async fn shutdown(self, exit: RunExit) -> Result<SourceStats> {
        let stats = self.source.stats();
        self.logger.log_shutdown(exit.as_str(), stats.in_flight);
        self.topology.shutdown().await?;
        Ok(stats)
    }
}

async fn submit(handle: &CascadeHandle, delivery: Delivery) {
    let unit_id = delivery.ticket.id();
    // The ticket is failed on error, so the unit comes back through the source
    if let Err(e) = handle.submit(delivery).await {
        warn!(unit_id = unit_id, error = %e, "Failed to submit unit of work");
    }
}
