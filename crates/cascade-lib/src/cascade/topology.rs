//! Wiring of the six stages into worker pools

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::stage::Stage;
use super::worker::{StageMessage, Worker, WorkerCommand};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::health::PipelineHealth;
use crate::models::{Granularity, StreamKey};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::reliability::Delivery;
use crate::routing::{Partitioner, WorkerId};
use crate::sink::SinkFanout;
use crate::stats::{StatisticsEngine, StreamState};

/// Sending side of one stage's worker pool
#[derive(Clone)]
pub struct StageHandle {
    granularity: Granularity,
    partitioner: Partitioner,
    workers: Vec<mpsc::Sender<WorkerCommand>>,
}

impl StageHandle {
    fn new(
        granularity: Granularity,
        partitioner: Partitioner,
        workers: Vec<mpsc::Sender<WorkerCommand>>,
    ) -> Self {
        Self {
            granularity,
            partitioner,
            workers,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    fn sender_for(&self, key: &StreamKey) -> Result<(WorkerId, &mpsc::Sender<WorkerCommand>)> {
        let id = self.partitioner.route(key);
        self.workers
            .get(id.0)
            .map(|sender| (id, sender))
            .ok_or_else(|| PipelineError::Routing {
                granularity: self.granularity,
                worker: id.0,
                workers: self.workers.len(),
            })
    }

    /// Queue a sample at the worker owning its key
    ///
    /// Waits while that worker's queue is full. On error the message's
    /// ticket has been failed.
    pub async fn dispatch(&self, message: StageMessage) -> Result<()> {
        let (id, sender) = match self.sender_for(&message.sample.key) {
            Ok(found) => found,
            Err(e) => {
                message.ticket.fail(self.granularity, e.to_string());
                return Err(e);
            }
        };

        if let Err(mpsc::error::SendError(command)) =
            sender.send(WorkerCommand::Process(message)).await
        {
            let e = PipelineError::ChannelClosed(format!("{} {}", self.granularity, id));
            if let WorkerCommand::Process(message) = command {
                message.ticket.fail(self.granularity, e.to_string());
            }
            return Err(e);
        }
        Ok(())
    }

    /// State snapshot for one key, read in order behind queued samples
    pub async fn inspect(&self, key: &StreamKey) -> Result<Option<StreamState>> {
        let (id, sender) = self.sender_for(key)?;
        let (reply, response) = oneshot::channel();
        sender
            .send(WorkerCommand::Inspect {
                key: key.clone(),
                reply,
            })
            .await
            .map_err(|_| self.closed(id))?;
        response.await.map_err(|_| self.closed(id))
    }

    /// Number of states held across the pool
    pub async fn census(&self) -> Result<usize> {
        let mut total = 0;
        for (index, sender) in self.workers.iter().enumerate() {
            let (reply, response) = oneshot::channel();
            sender
                .send(WorkerCommand::Census { reply })
                .await
                .map_err(|_| self.closed(WorkerId(index)))?;
            total += response.await.map_err(|_| self.closed(WorkerId(index)))?;
        }
        Ok(total)
    }

    async fn shutdown(&self) {
        for sender in &self.workers {
            // A worker that already stopped has nothing left to drain
            let _ = sender.send(WorkerCommand::Shutdown).await;
        }
    }

    fn closed(&self, id: WorkerId) -> PipelineError {
        PipelineError::ChannelClosed(format!("{} {}", self.granularity, id))
    }
}

/// Per-stage worker and state counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCensus {
    pub granularity: Granularity,
    pub workers: usize,
    pub states: usize,
}

/// Cloneable entry point into a running cascade
#[derive(Clone)]
pub struct CascadeHandle {
    stages: Arc<Vec<StageHandle>>,
}

impl CascadeHandle {
    /// Handle for one stage
    pub fn stage(&self, granularity: Granularity) -> &StageHandle {
        // Stages are stored finest first, in `Granularity::ALL` order
        &self.stages[granularity as usize]
    }

    /// Feed one delivery into the RAW stage
    pub async fn submit(&self, delivery: Delivery) -> Result<()> {
        self.stage(Granularity::Raw)
            .dispatch(StageMessage {
                sample: delivery.sample,
                ticket: delivery.ticket,
                replay_through: delivery.replay_through,
            })
            .await
    }

    pub async fn inspect(
        &self,
        granularity: Granularity,
        key: &StreamKey,
    ) -> Result<Option<StreamState>> {
        self.stage(granularity).inspect(key).await
    }

    pub async fn census(&self) -> Result<Vec<StageCensus>> {
        let mut census = Vec::with_capacity(self.stages.len());
        for stage in self.stages.iter() {
            census.push(StageCensus {
                granularity: stage.granularity,
                workers: stage.workers.len(),
                states: stage.census().await?,
            });
        }
        Ok(census)
    }
}

/// Running cascade: six stages, each a pool of single-writer workers
pub struct Topology {
    handle: CascadeHandle,
    workers: Vec<(Granularity, JoinHandle<Result<()>>)>,
}

impl Topology {
    /// Spawn every worker, coarsest stage first so each stage can be handed
    /// its downstream
    pub fn start(
        config: &PipelineConfig,
        sinks: Arc<SinkFanout>,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
        health: PipelineHealth,
    ) -> Result<Self> {
        config.validate()?;
        let engine = StatisticsEngine::new(config.engine.clone());

        let mut stages = Vec::with_capacity(Granularity::ALL.len());
        let mut workers = Vec::with_capacity(config.total_workers());
        let mut downstream: Option<StageHandle> = None;

        for granularity in Granularity::ALL.into_iter().rev() {
            let count = config.parallelism_for(granularity);
            let partitioner = Partitioner::new(count, config.grouping_for(granularity))?;

            let mut senders = Vec::with_capacity(count);
            for index in 0..count {
                let (tx, rx) = mpsc::channel(config.channel_capacity);
                let worker = Worker::new(
                    WorkerId(index),
                    Stage::new(granularity, engine.clone(), metrics.clone()),
                    sinks.clone(),
                    downstream.clone(),
                    rx,
                    metrics.clone(),
                    logger.clone(),
                    health.clone(),
                );
                workers.push((granularity, tokio::spawn(worker.run())));
                senders.push(tx);
            }

            let handle = StageHandle::new(granularity, partitioner, senders);
            downstream = Some(handle.clone());
            stages.push(handle);
        }
        stages.reverse();

        info!(
            workers = workers.len(),
            channel_capacity = config.channel_capacity,
            "Cascade topology started"
        );

        Ok(Self {
            handle: CascadeHandle {
                stages: Arc::new(stages),
            },
            workers,
        })
    }

    pub fn handle(&self) -> CascadeHandle {
        self.handle.clone()
    }

    /// Stop the stages finest first, letting each drain before the next
    ///
    /// Returns the first fatal worker error, if any.
    pub async fn shutdown(self) -> Result<()> {
        let mut first_error = None;
        let mut workers = self.workers;

        for stage in self.handle.stages.iter() {
            stage.shutdown().await;

            let (stopping, rest): (Vec<_>, Vec<_>) = workers
                .into_iter()
                .partition(|(granularity, _)| *granularity == stage.granularity);
            workers = rest;

            for (granularity, join) in stopping {
                match join.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(e) => {
                        error!(granularity = %granularity, error = %e, "Stage worker panicked");
                    }
                }
            }
        }

        info!("Cascade topology stopped");
        first_error.map_or(Ok(()), Err)
    }
}
