//! In-process sink that records every aggregate it receives

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{NotificationSink, PersistenceSink};
use crate::error::SinkError;
use crate::models::MetricAggregate;

/// Records persisted and notified aggregates in memory
///
/// Used by fixture replay and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    persisted: Mutex<Vec<MetricAggregate>>,
    notified: Mutex<Vec<MetricAggregate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn persisted(&self) -> Vec<MetricAggregate> {
        self.persisted.lock().await.clone()
    }

    pub async fn notified(&self) -> Vec<MetricAggregate> {
        self.notified.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn persist(&self, aggregate: &MetricAggregate) -> Result<(), SinkError> {
        self.persisted.lock().await.push(aggregate.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, aggregate: &MetricAggregate) -> Result<(), SinkError> {
        self.notified.lock().await.push(aggregate.clone());
        Ok(())
    }
}
