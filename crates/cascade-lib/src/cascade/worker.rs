//! Stage worker task
//!
//! A worker owns one `Stage` and consumes its bounded command queue in
//! order. For each sample it folds the statistics, issues the sink calls,
//! and forwards closed windows to the next tier with a clone of the
//! sample's ticket.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error};

use super::stage::Stage;
use super::topology::StageHandle;
use crate::error::{PipelineError, Result, SinkError};
use crate::health::{components, PipelineHealth};
use crate::models::{Granularity, MetricSample, StreamKey};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::reliability::Ticket;
use crate::routing::WorkerId;
use crate::sink::SinkFanout;
use crate::stats::StreamState;

/// A sample travelling through the cascade with its unit of work
#[derive(Debug)]
pub struct StageMessage {
    pub sample: MetricSample,
    pub ticket: Ticket,
    /// Coarsest stage a previous delivery of this unit failed at
    pub replay_through: Option<Granularity>,
}

/// Commands a worker answers, in queue order
#[derive(Debug)]
pub enum WorkerCommand {
    Process(StageMessage),
    Inspect {
        key: StreamKey,
        reply: oneshot::Sender<Option<StreamState>>,
    },
    Census {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

pub(crate) struct Worker {
    id: WorkerId,
    stage: Stage,
    sinks: Arc<SinkFanout>,
    downstream: Option<StageHandle>,
    commands: mpsc::Receiver<WorkerCommand>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    health: PipelineHealth,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        stage: Stage,
        sinks: Arc<SinkFanout>,
        downstream: Option<StageHandle>,
        commands: mpsc::Receiver<WorkerCommand>,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
        health: PipelineHealth,
    ) -> Self {
        Self {
            id,
            stage,
            sinks,
            downstream,
            commands,
            metrics,
            logger,
            health,
        }
    }

    /// Consume commands until shutdown or until every sender is gone
    ///
    /// Returns an error only for faults that break single-writer ownership.
    pub(crate) async fn run(mut self) -> Result<()> {
        let granularity = self.stage.granularity();
        debug!(granularity = %granularity, worker = %self.id, "Stage worker started");

        while let Some(command) = self.commands.recv().await {
            match command {
                WorkerCommand::Process(message) => {
                    if let Err(e) = self.handle(message).await {
                        error!(
                            granularity = %granularity,
                            worker = %self.id,
                            error = %e,
                            "Stage worker stopping on fatal error"
                        );
                        self.health
                            .worker_stopped(granularity, self.id, &e.to_string())
                            .await;
                        return Err(e);
                    }
                }
                WorkerCommand::Inspect { key, reply } => {
                    let _ = reply.send(self.stage.inspect(&key));
                }
                WorkerCommand::Census { reply } => {
                    let _ = reply.send(self.stage.census());
                }
                WorkerCommand::Shutdown => break,
            }
        }

        debug!(
            granularity = %granularity,
            worker = %self.id,
            states = self.stage.census(),
            "Stage worker stopped"
        );
        Ok(())
    }

    async fn handle(&mut self, message: StageMessage) -> Result<()> {
        let start = Instant::now();
        let granularity = self.stage.granularity();
        let StageMessage {
            sample,
            ticket,
            replay_through,
        } = message;

        let aggregate = match self.stage.process(&sample) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                if e.fails_unit() {
                    ticket.fail(granularity, e.to_string());
                } else {
                    self.metrics.inc_invalid_samples();
                    self.logger
                        .log_sample_rejected(granularity, &sample.key.to_string(), &e.to_string());
                }
                return Ok(());
            }
        };

        if aggregate.is_anomaly {
            self.metrics.inc_anomalies(granularity, aggregate.severity);
        }

        let dispatched = match self.sinks.dispatch(&aggregate).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                self.metrics.inc_sink_errors(sink_label(&e));
                self.logger.log_sink_failure(
                    granularity,
                    &aggregate.key.to_string(),
                    ticket.id(),
                    &e.to_string(),
                );
                self.health.sink_failed(&e).await;
                ticket.fail(granularity, e.to_string());
                self.metrics
                    .observe_sample(granularity, start.elapsed().as_secs_f64());
                return Ok(());
            }
        };
        if dispatched.persisted {
            self.health.sink_succeeded(components::PERSISTENCE_SINK).await;
        }
        if dispatched.notified {
            self.health.sink_succeeded(components::NOTIFICATION_SINK).await;
        }

        if let Some(forward) = self.stage.close_window(&aggregate, replay_through) {
            if let Some(downstream) = &self.downstream {
                self.logger.log_window_closed(
                    granularity,
                    &aggregate.key.to_string(),
                    aggregate.timestamp,
                );

                let message = StageMessage {
                    sample: forward,
                    ticket: ticket.clone(),
                    replay_through,
                };
                match downstream.dispatch(message).await {
                    Ok(()) => self.metrics.inc_forwarded(granularity),
                    Err(e @ PipelineError::Routing { .. }) => return Err(e),
                    Err(e) => {
                        debug!(
                            granularity = %granularity,
                            unit_id = ticket.id(),
                            error = %e,
                            "Forward to next stage failed"
                        );
                    }
                }
            }
        }

        self.metrics
            .observe_sample(granularity, start.elapsed().as_secs_f64());
        Ok(())
    }
}

fn sink_label(error: &SinkError) -> &'static str {
    match error {
        SinkError::Persistence(_) => "persistence",
        SinkError::Notification(_) => "notification",
        SinkError::Timeout { sink, .. } => *sink,
    }
}
