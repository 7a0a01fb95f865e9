//! Notification sink that reports anomalies as structured log events

use async_trait::async_trait;

use super::NotificationSink;
use crate::error::SinkError;
use crate::models::MetricAggregate;
use crate::observability::StructuredLogger;

pub struct LogNotificationSink {
    logger: StructuredLogger,
}

impl LogNotificationSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, aggregate: &MetricAggregate) -> Result<(), SinkError> {
        self.logger.log_anomaly(aggregate);
        Ok(())
    }
}
