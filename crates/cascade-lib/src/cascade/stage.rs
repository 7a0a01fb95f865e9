//! Single-writer stage state for one worker

use crate::error::Result;
use crate::models::{Granularity, MetricAggregate, MetricSample, StreamKey};
use crate::observability::PipelineMetrics;
use crate::stats::{StateTable, StatisticsEngine, StreamState};

/// Statistics and window bookkeeping for the keys one worker owns at one tier
pub struct Stage {
    granularity: Granularity,
    engine: StatisticsEngine,
    states: StateTable,
    metrics: PipelineMetrics,
}

impl Stage {
    pub fn new(
        granularity: Granularity,
        engine: StatisticsEngine,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            granularity,
            engine,
            states: StateTable::new(),
            metrics,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Fold one sample into its key's state
    ///
    /// The state is opened lazily with the sample timestamp; invalid samples
    /// never open a state.
    pub fn process(&mut self, sample: &MetricSample) -> Result<MetricAggregate> {
        self.engine.validate(sample)?;

        let (state, created) = self.states.get_or_open(&sample.key, sample.timestamp);
        let aggregate = self.engine.update(self.granularity, state, sample)?;

        if created {
            self.metrics.inc_stream_states(self.granularity);
        }
        Ok(aggregate)
    }

    /// Decide whether `aggregate` closes its window and should move downstream
    ///
    /// A window closes once a full period has elapsed since the previous
    /// emission (or since the state opened). A redelivered unit that failed
    /// at a coarser stage is forwarded regardless of the window, since its
    /// first delivery already passed through here; the emission anchor is
    /// left untouched. The coarsest tier never forwards.
    pub fn close_window(
        &mut self,
        aggregate: &MetricAggregate,
        replay_through: Option<Granularity>,
    ) -> Option<MetricSample> {
        self.granularity.next()?;
        let state = self.states.get_mut(&aggregate.key)?;

        if replay_through.is_some_and(|target| self.granularity < target) {
            return Some(aggregate.to_sample());
        }

        let elapsed = aggregate.timestamp - state.window_anchor();
        if elapsed < self.granularity.period_ms() {
            return None;
        }

        state.last_emitted_timestamp = Some(aggregate.timestamp);
        Some(aggregate.to_sample())
    }

    /// Snapshot of one key's state
    pub fn inspect(&self, key: &StreamKey) -> Option<StreamState> {
        self.states.get(key).cloned()
    }

    /// Number of keys with state at this worker
    pub fn census(&self) -> usize {
        self.states.len()
    }
}
