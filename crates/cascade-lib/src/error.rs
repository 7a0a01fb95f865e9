//! Error taxonomy for the pipeline

use std::time::Duration;
use thiserror::Error;

use crate::health::components;
use crate::models::Granularity;

/// Failure of a persistence or notification collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("{sink} sink timed out after {timeout:?}")]
    Timeout { sink: &'static str, timeout: Duration },
}

impl SinkError {
    /// Health component of the sink that failed
    pub fn component(&self) -> &'static str {
        match self {
            SinkError::Persistence(_) => components::PERSISTENCE_SINK,
            SinkError::Notification(_) => components::NOTIFICATION_SINK,
            SinkError::Timeout { sink, .. } if *sink == "notification" => {
                components::NOTIFICATION_SINK
            }
            SinkError::Timeout { .. } => components::PERSISTENCE_SINK,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid sample for {key}: value {value} is not finite")]
    InvalidSample { key: String, value: f64 },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("routing error at {granularity} stage: worker {worker} outside table of {workers}")]
    Routing {
        granularity: Granularity,
        worker: usize,
        workers: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} channel closed")]
    ChannelClosed(String),
}

impl PipelineError {
    /// Whether the unit of work carrying this error must be redelivered
    pub fn fails_unit(&self) -> bool {
        !matches!(self, PipelineError::InvalidSample { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
