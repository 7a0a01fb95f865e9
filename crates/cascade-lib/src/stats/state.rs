//! Per-stream statistics records and the per-worker table that owns them

use serde::Serialize;
use std::collections::HashMap;

use crate::models::StreamKey;

/// Mutable statistics for one (stream, granularity) pair
///
/// Only the worker that owns the key ever touches an instance, so no
/// synchronization is involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    /// Number of samples folded in
    pub sample_count: u64,
    pub last_value: f64,
    /// Latest timestamp seen (ms); never moves backwards
    pub last_timestamp: i64,
    pub running_mean: f64,
    pub running_std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Timestamp of the first sample, anchors the first window
    pub opened_at: i64,
    /// Timestamp of the last aggregate forwarded to the next stage
    pub last_emitted_timestamp: Option<i64>,
    /// Remaining suppressed excursions after an anomaly fired
    pub anomaly_snooze: u32,
    #[serde(skip)]
    pub(crate) m2: f64,
    #[serde(skip)]
    pub(crate) variance: f64,
}

impl StreamState {
    pub fn new(opened_at: i64) -> Self {
        Self {
            sample_count: 0,
            last_value: 0.0,
            last_timestamp: opened_at,
            running_mean: 0.0,
            running_std_dev: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            opened_at,
            last_emitted_timestamp: None,
            anomaly_snooze: 0,
            m2: 0.0,
            variance: 0.0,
        }
    }

    /// Start of the window currently accumulating
    pub fn window_anchor(&self) -> i64 {
        self.last_emitted_timestamp.unwrap_or(self.opened_at)
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Arena of stream states keyed by `StreamKey`, owned by a single worker
#[derive(Debug, Default)]
pub struct StateTable {
    states: HashMap<StreamKey, StreamState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state for a key, creating it lazily with the given opening timestamp
    ///
    /// The returned flag is true when the state was created by this call.
    pub fn get_or_open(&mut self, key: &StreamKey, timestamp: i64) -> (&mut StreamState, bool) {
        let created = !self.states.contains_key(key);
        let state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| StreamState::new(timestamp));
        (state, created)
    }

    pub fn get(&self, key: &StreamKey) -> Option<&StreamState> {
        self.states.get(key)
    }

    pub fn get_mut(&mut self, key: &StreamKey) -> Option<&mut StreamState> {
        self.states.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StreamKey> {
        self.states.keys()
    }
}
