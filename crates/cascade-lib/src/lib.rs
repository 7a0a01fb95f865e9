//! Streaming metric statistics cascade
//!
//! This crate provides the core functionality for:
//! - Incremental statistics and z-score anomaly classification per stream
//! - A six-tier granularity cascade (raw, minute, hour, day, week, month)
//! - Hash partitioning of streams onto single-writer workers
//! - Persistence and notification sinks with bounded retries
//! - At-least-once delivery with redelivery of failed units of work
//! - Health checks and observability

pub mod cascade;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reliability;
pub mod routing;
pub mod sink;
pub mod stats;

pub use cascade::{CascadeHandle, Pipeline, RunExit, StageCensus, Topology};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, PipelineHealth,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use reliability::{AckingSource, RedeliveryPolicy, SourceStats};
pub use routing::{Grouping, Partitioner, WorkerId};
pub use sink::{
    JsonlPersistenceSink, LogNotificationSink, MemorySink, NotificationSink, PersistenceSink,
    RetryPolicy, SinkFanout,
};
pub use stats::{EngineConfig, StatisticsEngine, StreamState};
