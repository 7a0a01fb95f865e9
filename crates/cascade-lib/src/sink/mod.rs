//! Sink adapters for emitted aggregates
//!
//! This module provides:
//! - The persistence and notification collaborator traits
//! - `SinkFanout`, which routes each aggregate to the sinks it is due for
//! - Bounded retry with per-call timeouts
//! - Ready-made adapters: JSON lines file, tracing log, in-memory recorder

mod jsonl;
mod log;
mod memory;
mod retry;

pub use jsonl::JsonlPersistenceSink;
pub use log::LogNotificationSink;
pub use memory::MemorySink;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::SinkError;
use crate::models::{Granularity, MetricAggregate};

/// Durable storage for aggregates
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, aggregate: &MetricAggregate) -> Result<(), SinkError>;
}

/// Receiver of anomalous aggregates
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, aggregate: &MetricAggregate) -> Result<(), SinkError>;
}

/// Which sink calls one aggregate produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub persisted: bool,
    pub notified: bool,
}

/// Fans each aggregate out to the persistence and notification sinks
pub struct SinkFanout {
    persistence: Arc<dyn PersistenceSink>,
    notification: Arc<dyn NotificationSink>,
    persist_granularities: BTreeSet<Granularity>,
    retry: RetryPolicy,
}

impl SinkFanout {
    pub fn new(
        persistence: Arc<dyn PersistenceSink>,
        notification: Arc<dyn NotificationSink>,
        persist_granularities: impl IntoIterator<Item = Granularity>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            persistence,
            notification,
            persist_granularities: persist_granularities.into_iter().collect(),
            retry,
        }
    }

    /// Whether aggregates of this tier are persisted
    pub fn persists(&self, granularity: Granularity) -> bool {
        self.persist_granularities.contains(&granularity)
    }

    /// Issue every sink call the aggregate is due for
    ///
    /// Persistence runs first; the first call that exhausts its retry budget
    /// aborts the dispatch.
    pub async fn dispatch(&self, aggregate: &MetricAggregate) -> Result<Dispatched, SinkError> {
        let mut dispatched = Dispatched::default();

        if self.persists(aggregate.granularity) {
            self.retry
                .run("persistence", || self.persistence.persist(aggregate))
                .await?;
            dispatched.persisted = true;
        }

        if aggregate.is_anomaly {
            self.retry
                .run("notification", || self.notification.notify(aggregate))
                .await?;
            dispatched.notified = true;
        }

        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricType, Severity, StreamKey};

    fn aggregate(granularity: Granularity, is_anomaly: bool) -> MetricAggregate {
        MetricAggregate {
            key: StreamKey::simple("acct", "CPU"),
            granularity,
            metric_type: MetricType::Absolute,
            value: 1.0,
            mean: 1.0,
            std_dev: 0.0,
            diff: 0.0,
            min: 1.0,
            max: 1.0,
            is_anomaly,
            severity: if is_anomaly {
                Severity::High
            } else {
                Severity::Normal
            },
            z_score: 0.0,
            sample_count: 1,
            timestamp: 0,
        }
    }

    fn fanout(sink: &Arc<MemorySink>) -> SinkFanout {
        SinkFanout::new(
            sink.clone(),
            sink.clone(),
            [Granularity::Hour, Granularity::Day],
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_raw_tier_not_persisted() {
        let sink = Arc::new(MemorySink::new());
        let fanout = fanout(&sink);

        let dispatched = fanout.dispatch(&aggregate(Granularity::Raw, false)).await.unwrap();

        assert_eq!(dispatched, Dispatched::default());
        assert!(sink.persisted().await.is_empty());
        assert!(sink.notified().await.is_empty());
    }

    #[tokio::test]
    async fn test_configured_tier_persisted() {
        let sink = Arc::new(MemorySink::new());
        let fanout = fanout(&sink);

        let dispatched = fanout.dispatch(&aggregate(Granularity::Hour, false)).await.unwrap();

        assert!(dispatched.persisted);
        assert!(!dispatched.notified);
        assert_eq!(sink.persisted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_anomaly_notified_on_any_tier() {
        let sink = Arc::new(MemorySink::new());
        let fanout = fanout(&sink);

        fanout.dispatch(&aggregate(Granularity::Raw, true)).await.unwrap();
        fanout.dispatch(&aggregate(Granularity::Day, true)).await.unwrap();

        let notified = sink.notified().await;
        assert_eq!(notified.len(), 2);
        assert!(notified.iter().all(|a| a.severity.level() == 2));
        assert_eq!(sink.persisted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_notification() {
        struct Broken;

        #[async_trait]
        impl PersistenceSink for Broken {
            async fn persist(&self, _aggregate: &MetricAggregate) -> Result<(), SinkError> {
                Err(SinkError::Persistence("disk full".to_string()))
            }
        }

        let notifications = Arc::new(MemorySink::new());
        let fanout = SinkFanout::new(
            Arc::new(Broken),
            notifications.clone(),
            [Granularity::Hour],
            RetryPolicy {
                max_retries: 1,
                retry_delay_ms: 1,
                ..Default::default()
            },
        );

        let result = fanout.dispatch(&aggregate(Granularity::Hour, true)).await;

        assert_eq!(result, Err(SinkError::Persistence("disk full".to_string())));
        assert!(notifications.notified().await.is_empty());
    }
}
