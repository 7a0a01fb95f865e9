//! Incremental statistics and anomaly classification
//!
//! Folds one sample into a `StreamState`: running extrema, a Welford
//! average while the stream warms up and exponential smoothing afterwards.
//! Each sample is classified by its z-score against the statistics as they
//! stood before the sample was folded in.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::StreamState;
use crate::error::{PipelineError, Result};
use crate::models::{Granularity, MetricAggregate, MetricSample, Severity};

/// Default number of samples a stream needs before anomalies are reported
const DEFAULT_WARMUP_SAMPLES: u64 = 30;

/// Default number of excursions suppressed after an anomaly fires
const DEFAULT_SNOOZE_COOLDOWN: u32 = 5;

/// Lower bound for the standard deviation used as z-score denominator
const DEFAULT_STD_DEV_FLOOR: f64 = 1e-9;

/// z-score bands for moderate and high severity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    pub moderate: f64,
    pub high: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            moderate: 2.0,
            high: 3.0,
        }
    }
}

/// Tunables for the statistics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per stream during which classification is suppressed (W)
    pub warmup_samples: u64,
    /// Excursions suppressed after an anomaly fires
    pub snooze_cooldown: u32,
    pub thresholds: AnomalyThresholds,
    /// Exponential smoothing factor after warm-up; defaults to `2 / (max(W, 1) + 1)`
    pub smoothing_alpha: Option<f64>,
    pub std_dev_floor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            snooze_cooldown: DEFAULT_SNOOZE_COOLDOWN,
            thresholds: AnomalyThresholds::default(),
            smoothing_alpha: None,
            std_dev_floor: DEFAULT_STD_DEV_FLOOR,
        }
    }
}

impl EngineConfig {
    /// Effective smoothing factor
    pub fn alpha(&self) -> f64 {
        self.smoothing_alpha
            .unwrap_or_else(|| 2.0 / (self.warmup_samples.max(1) as f64 + 1.0))
    }

    pub fn validate(&self) -> Result<()> {
        let alpha = self.alpha();
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(PipelineError::Config(format!(
                "smoothing alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        let t = self.thresholds;
        if !(t.moderate > 0.0 && t.moderate <= t.high) {
            return Err(PipelineError::Config(format!(
                "thresholds must satisfy 0 < moderate <= high, got {} / {}",
                t.moderate, t.high
            )));
        }
        if !(self.std_dev_floor > 0.0) {
            return Err(PipelineError::Config(
                "std_dev_floor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stateless engine applying one sample to one `StreamState`
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    config: EngineConfig,
    alpha: f64,
}

impl StatisticsEngine {
    pub fn new(config: EngineConfig) -> Self {
        let alpha = config.alpha();
        Self { config, alpha }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Absolute z-score of `value` against a mean and floored standard deviation
    pub fn z_score(&self, value: f64, mean: f64, std_dev: f64) -> f64 {
        (value - mean).abs() / std_dev.max(self.config.std_dev_floor)
    }

    /// Map a z-score onto a severity band
    pub fn classify(&self, z_score: f64) -> Severity {
        if z_score > self.config.thresholds.high {
            Severity::High
        } else if z_score > self.config.thresholds.moderate {
            Severity::Moderate
        } else {
            Severity::Normal
        }
    }

    /// Reject samples whose value cannot be folded into running statistics
    pub fn validate(&self, sample: &MetricSample) -> Result<()> {
        if sample.value.is_finite() {
            Ok(())
        } else {
            Err(PipelineError::InvalidSample {
                key: sample.key.to_string(),
                value: sample.value,
            })
        }
    }

    /// Fold `sample` into `state` and describe the result
    ///
    /// Non-finite values are rejected without touching `state`.
    pub fn update(
        &self,
        granularity: Granularity,
        state: &mut StreamState,
        sample: &MetricSample,
    ) -> Result<MetricAggregate> {
        self.validate(sample)?;
        let value = sample.value;

        let first = state.is_empty();
        let prior_mean = state.running_mean;
        let (z_score, diff) = if first {
            (0.0, 0.0)
        } else {
            (
                self.z_score(value, prior_mean, state.running_std_dev),
                value - prior_mean,
            )
        };

        if sample.timestamp < state.last_timestamp {
            debug!(
                key = %sample.key,
                granularity = %granularity,
                timestamp = sample.timestamp,
                last_timestamp = state.last_timestamp,
                "Out-of-order sample folded in"
            );
        }
        state.last_timestamp = state.last_timestamp.max(sample.timestamp);
        state.last_value = value;
        state.min = state.min.min(value);
        state.max = state.max.max(value);
        state.sample_count += 1;
        self.fold(state, value);

        let severity = self.apply_hysteresis(state, self.classify(z_score));

        Ok(MetricAggregate {
            key: sample.key.clone(),
            granularity,
            metric_type: sample.metric_type,
            value,
            mean: state.running_mean,
            std_dev: state.running_std_dev,
            diff,
            min: state.min,
            max: state.max,
            is_anomaly: severity.is_anomalous(),
            severity,
            z_score,
            sample_count: state.sample_count,
            timestamp: sample.timestamp,
        })
    }

    /// Update mean and variance; `state.sample_count` already includes `value`
    fn fold(&self, state: &mut StreamState, value: f64) {
        let n = state.sample_count;
        let delta = value - state.running_mean;

        if n <= self.config.warmup_samples.max(1) {
            // Welford
            state.running_mean += delta / n as f64;
            state.m2 += delta * (value - state.running_mean);
            state.variance = state.m2 / n as f64;
        } else {
            state.running_mean += self.alpha * delta;
            state.variance = (1.0 - self.alpha) * (state.variance + self.alpha * delta * delta);
        }

        state.running_std_dev = state.variance.max(0.0).sqrt();
    }

    /// Apply warm-up suppression and snooze to a raw classification
    fn apply_hysteresis(&self, state: &mut StreamState, raw: Severity) -> Severity {
        if state.sample_count <= self.config.warmup_samples {
            return Severity::Normal;
        }

        if !raw.is_anomalous() {
            state.anomaly_snooze = 0;
            return Severity::Normal;
        }

        if state.anomaly_snooze > 0 {
            state.anomaly_snooze -= 1;
            return Severity::Normal;
        }

        state.anomaly_snooze = self.config.snooze_cooldown;
        raw
    }
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
