//! Core data models for the metric cascade

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identity of one logical numeric time series
///
/// Criteria are kept in a `BTreeMap` so that equality, hashing and the
/// canonical string form do not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamKey {
    account_id: String,
    metric_name: String,
    criteria: BTreeMap<String, String>,
}

impl StreamKey {
    pub fn new<I, K, V>(
        account_id: impl Into<String>,
        metric_name: impl Into<String>,
        criteria: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            account_id: account_id.into(),
            metric_name: metric_name.into(),
            criteria: criteria
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Key without any criteria
    pub fn simple(account_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self::new(account_id, metric_name, std::iter::empty::<(String, String)>())
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn criteria(&self) -> &BTreeMap<String, String> {
        &self.criteria
    }

    /// Canonical string form: `account|metric|k1=v1,k2=v2`
    pub fn canonical(&self) -> String {
        let mut out = self.metric_prefix();
        out.push('|');
        let mut first = true;
        for (k, v) in &self.criteria {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Account and metric name only, criteria excluded
    pub fn metric_prefix(&self) -> String {
        format!("{}|{}", self.account_id, self.metric_name)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// How a sample value relates to its predecessors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    /// Point-in-time reading (e.g. CPU usage)
    #[default]
    Absolute,
    /// Count accumulated since the previous sample
    Delta,
}

/// One numeric observation for a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub key: StreamKey,
    pub metric_type: MetricType,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_label: Option<String>,
}

impl MetricSample {
    pub fn new(key: StreamKey, timestamp: i64, value: f64) -> Self {
        Self {
            key,
            metric_type: MetricType::Absolute,
            timestamp,
            value,
            debug_label: None,
        }
    }

    pub fn with_metric_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    pub fn with_debug_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }
}

/// Flat inbound record as produced by upstream emitters (one JSON object per line)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub account_id: String,
    pub metric_name: String,
    #[serde(default)]
    pub metric_type: MetricType,
    pub timestamp: i64,
    pub value: f64,
    #[serde(default)]
    pub criteria: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_label: Option<String>,
}

impl From<SampleRecord> for MetricSample {
    fn from(record: SampleRecord) -> Self {
        Self {
            key: StreamKey::new(record.account_id, record.metric_name, record.criteria),
            metric_type: record.metric_type,
            timestamp: record.timestamp,
            value: record.value,
            debug_label: record.debug_label,
        }
    }
}

/// Stages of the cascade, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Raw,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::Raw,
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    /// Window length in milliseconds
    pub fn period_ms(&self) -> i64 {
        match self {
            Granularity::Raw => SECOND_MS,
            Granularity::Minute => MINUTE_MS,
            Granularity::Hour => HOUR_MS,
            Granularity::Day => DAY_MS,
            Granularity::Week => 7 * DAY_MS,
            Granularity::Month => 30 * DAY_MS,
        }
    }

    /// Next coarser stage, `None` for the last stage
    pub fn next(&self) -> Option<Granularity> {
        match self {
            Granularity::Raw => Some(Granularity::Minute),
            Granularity::Minute => Some(Granularity::Hour),
            Granularity::Hour => Some(Granularity::Day),
            Granularity::Day => Some(Granularity::Week),
            Granularity::Week => Some(Granularity::Month),
            Granularity::Month => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Raw => "raw",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown granularity '{}'", s))
    }
}

/// Anomaly severity bands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Moderate,
    High,
}

impl Severity {
    /// Numeric level: 0 normal, 1 moderate, 2 high
    pub fn level(&self) -> u8 {
        match self {
            Severity::Normal => 0,
            Severity::Moderate => 1,
            Severity::High => 2,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        *self != Severity::Normal
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Result of folding one sample into a stream's state at one granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggregate {
    pub key: StreamKey,
    pub granularity: Granularity,
    pub metric_type: MetricType,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// `value` minus the mean before this sample was folded in
    pub diff: f64,
    pub min: f64,
    pub max: f64,
    pub is_anomaly: bool,
    pub severity: Severity,
    pub z_score: f64,
    pub sample_count: u64,
    pub timestamp: i64,
}

impl MetricAggregate {
    /// Re-wrap this aggregate as the input sample of a coarser stage
    pub fn to_sample(&self) -> MetricSample {
        MetricSample {
            key: self.key.clone(),
            metric_type: self.metric_type,
            timestamp: self.timestamp,
            value: self.value,
            debug_label: None,
        }
    }
}
