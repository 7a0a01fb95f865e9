//! Observability infrastructure for the pipeline
//!
//! Provides:
//! - Prometheus metrics (per-stage throughput and latency, anomalies, sink errors, unit outcomes)
//! - Structured logging of pipeline events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::models::{Granularity, MetricAggregate, Severity};

/// Histogram buckets for per-sample stage latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    samples_processed: IntCounterVec,
    samples_forwarded: IntCounterVec,
    invalid_samples: IntCounter,
    anomalies_detected: IntCounterVec,
    sink_errors: IntCounterVec,
    stream_states: IntGaugeVec,
    stage_latency_seconds: HistogramVec,
    units_acked: IntCounter,
    units_failed: IntCounter,
    units_redelivered: IntCounter,
    units_dead_lettered: IntCounter,
    units_in_flight: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            samples_processed: register_int_counter_vec!(
                "cascade_samples_processed_total",
                "Samples folded into stream state, by granularity",
                &["granularity"]
            )
            .expect("Failed to register samples_processed"),

            samples_forwarded: register_int_counter_vec!(
                "cascade_samples_forwarded_total",
                "Aggregates forwarded to the next coarser stage, by source granularity",
                &["granularity"]
            )
            .expect("Failed to register samples_forwarded"),

            invalid_samples: register_int_counter!(
                "cascade_invalid_samples_total",
                "Samples rejected for non-finite values"
            )
            .expect("Failed to register invalid_samples"),

            anomalies_detected: register_int_counter_vec!(
                "cascade_anomalies_detected_total",
                "Anomalous aggregates, by granularity and severity",
                &["granularity", "severity"]
            )
            .expect("Failed to register anomalies_detected"),

            sink_errors: register_int_counter_vec!(
                "cascade_sink_errors_total",
                "Sink calls that failed after retries",
                &["sink"]
            )
            .expect("Failed to register sink_errors"),

            stream_states: register_int_gauge_vec!(
                "cascade_stream_states",
                "Stream states held in worker tables, by granularity",
                &["granularity"]
            )
            .expect("Failed to register stream_states"),

            stage_latency_seconds: register_histogram_vec!(
                "cascade_stage_latency_seconds",
                "Time spent processing one sample in a stage, including sink calls",
                &["granularity"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_latency_seconds"),

            units_acked: register_int_counter!(
                "cascade_units_acked_total",
                "Units of work acknowledged"
            )
            .expect("Failed to register units_acked"),

            units_failed: register_int_counter!(
                "cascade_units_failed_total",
                "Units of work that failed a pass"
            )
            .expect("Failed to register units_failed"),

            units_redelivered: register_int_counter!(
                "cascade_units_redelivered_total",
                "Units of work redelivered after failure"
            )
            .expect("Failed to register units_redelivered"),

            units_dead_lettered: register_int_counter!(
                "cascade_units_dead_lettered_total",
                "Units of work dropped after exhausting redelivery attempts"
            )
            .expect("Failed to register units_dead_lettered"),

            units_in_flight: register_int_gauge!(
                "cascade_units_in_flight",
                "Units of work delivered but not yet resolved"
            )
            .expect("Failed to register units_in_flight"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    /// Record one processed sample and its latency
    pub fn observe_sample(&self, granularity: Granularity, duration_secs: f64) {
        let label = granularity.as_str();
        self.inner()
            .samples_processed
            .with_label_values(&[label])
            .inc();
        self.inner()
            .stage_latency_seconds
            .with_label_values(&[label])
            .observe(duration_secs);
    }

    pub fn inc_forwarded(&self, from: Granularity) {
        self.inner()
            .samples_forwarded
            .with_label_values(&[from.as_str()])
            .inc();
    }

    pub fn inc_invalid_samples(&self) {
        self.inner().invalid_samples.inc();
    }

    pub fn inc_anomalies(&self, granularity: Granularity, severity: Severity) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[granularity.as_str(), &severity.to_string()])
            .inc();
    }

    pub fn inc_sink_errors(&self, sink: &str) {
        self.inner().sink_errors.with_label_values(&[sink]).inc();
    }

    pub fn inc_stream_states(&self, granularity: Granularity) {
        self.inner()
            .stream_states
            .with_label_values(&[granularity.as_str()])
            .inc();
    }

    pub fn inc_units_acked(&self) {
        self.inner().units_acked.inc();
    }

    pub fn inc_units_failed(&self) {
        self.inner().units_failed.inc();
    }

    pub fn inc_units_redelivered(&self) {
        self.inner().units_redelivered.inc();
    }

    pub fn inc_units_dead_lettered(&self) {
        self.inner().units_dead_lettered.inc();
    }

    pub fn set_units_in_flight(&self, count: i64) {
        self.inner().units_in_flight.set(count);
    }
}

/// Structured logger for pipeline events
///
/// Every event carries a stable `event` field so log pipelines can filter
/// on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log an anomalous aggregate
    pub fn log_anomaly(&self, aggregate: &MetricAggregate) {
        match aggregate.severity {
            Severity::High => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    key = %aggregate.key,
                    granularity = %aggregate.granularity,
                    severity = aggregate.severity.level(),
                    value = aggregate.value,
                    mean = aggregate.mean,
                    std_dev = aggregate.std_dev,
                    z_score = aggregate.z_score,
                    timestamp = aggregate.timestamp,
                    "High severity anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    key = %aggregate.key,
                    granularity = %aggregate.granularity,
                    severity = aggregate.severity.level(),
                    value = aggregate.value,
                    mean = aggregate.mean,
                    std_dev = aggregate.std_dev,
                    z_score = aggregate.z_score,
                    timestamp = aggregate.timestamp,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log a sample dropped for a non-finite value
    pub fn log_sample_rejected(&self, granularity: Granularity, key: &str, reason: &str) {
        warn!(
            event = "sample_rejected",
            instance = %self.instance,
            granularity = %granularity,
            key = %key,
            reason = %reason,
            "Dropped invalid sample"
        );
    }

    /// Log a sink call that exhausted its retry budget
    pub fn log_sink_failure(&self, granularity: Granularity, key: &str, unit_id: u64, error: &str) {
        warn!(
            event = "sink_failed",
            instance = %self.instance,
            granularity = %granularity,
            key = %key,
            unit_id = unit_id,
            error = %error,
            "Sink call failed, unit of work will be redelivered"
        );
    }

    /// Log a redelivery of a failed unit of work
    pub fn log_redelivery(&self, unit_id: u64, attempt: u32, reason: &str) {
        info!(
            event = "unit_redelivered",
            instance = %self.instance,
            unit_id = unit_id,
            attempt = attempt,
            reason = %reason,
            "Redelivering failed unit of work"
        );
    }

    /// Log a unit of work dropped after its last attempt
    pub fn log_dead_letter(&self, unit_id: u64, attempts: u32, key: &str, reason: &str) {
        error!(
            event = "unit_dead_lettered",
            instance = %self.instance,
            unit_id = unit_id,
            attempts = attempts,
            key = %key,
            reason = %reason,
            "Unit of work exhausted redelivery attempts"
        );
    }

    /// Log a closed window forwarded downstream
    pub fn log_window_closed(&self, from: Granularity, key: &str, timestamp: i64) {
        debug!(
            event = "window_closed",
            instance = %self.instance,
            granularity = %from,
            key = %key,
            timestamp = timestamp,
            "Forwarding aggregate to next stage"
        );
    }

    /// Log pipeline startup
    pub fn log_startup(&self, version: &str, workers: usize) {
        info!(
            event = "pipeline_started",
            instance = %self.instance,
            version = %version,
            workers = workers,
            "Metric cascade started"
        );
    }

    /// Log pipeline shutdown
    pub fn log_shutdown(&self, reason: &str, in_flight: usize) {
        info!(
            event = "pipeline_shutdown",
            instance = %self.instance,
            reason = %reason,
            in_flight = in_flight,
            "Metric cascade shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_creation() {
        // Prometheus uses a global registry; repeated handles share it
        let metrics = PipelineMetrics::new();
        let again = PipelineMetrics::new();

        metrics.observe_sample(Granularity::Raw, 0.0001);
        metrics.inc_forwarded(Granularity::Raw);
        metrics.inc_anomalies(Granularity::Hour, Severity::High);
        metrics.inc_sink_errors("persistence");
        again.inc_stream_states(Granularity::Day);
        again.inc_units_acked();
        again.set_units_in_flight(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cascade_samples_processed_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance(), "test-instance");
    }
}
