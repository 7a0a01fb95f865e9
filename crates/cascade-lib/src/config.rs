//! Pipeline configuration
//!
//! Everything here deserializes with defaults, so a partial file or a
//! handful of environment overrides is enough.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PipelineError, Result};
use crate::models::Granularity;
use crate::reliability::RedeliveryPolicy;
use crate::routing::Grouping;
use crate::sink::RetryPolicy;
use crate::stats::EngineConfig;

/// Default worker count for the high-volume tiers
const DEFAULT_FINE_PARALLELISM: usize = 8;

/// Default bounded queue size in front of each worker
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// Tiers whose aggregates go to the persistence sink
    pub persist_granularities: BTreeSet<Granularity>,
    /// Worker count per tier; missing tiers use the defaults
    pub parallelism: BTreeMap<Granularity, usize>,
    /// Routing grouping per tier; missing tiers use the defaults
    pub grouping: BTreeMap<Granularity, Grouping>,
    pub channel_capacity: usize,
    pub sink: RetryPolicy,
    pub redelivery: RedeliveryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            persist_granularities: [
                Granularity::Hour,
                Granularity::Day,
                Granularity::Week,
                Granularity::Month,
            ]
            .into_iter()
            .collect(),
            parallelism: BTreeMap::new(),
            grouping: BTreeMap::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            sink: RetryPolicy::default(),
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn parallelism_for(&self, granularity: Granularity) -> usize {
        self.parallelism
            .get(&granularity)
            .copied()
            .unwrap_or(match granularity {
                Granularity::Raw | Granularity::Minute => DEFAULT_FINE_PARALLELISM,
                _ => 1,
            })
    }

    pub fn grouping_for(&self, granularity: Granularity) -> Grouping {
        self.grouping
            .get(&granularity)
            .copied()
            .unwrap_or(match granularity {
                Granularity::Raw | Granularity::Minute => Grouping::Key,
                _ => Grouping::Metric,
            })
    }

    /// Total worker tasks across all tiers
    pub fn total_workers(&self) -> usize {
        Granularity::ALL
            .iter()
            .map(|g| self.parallelism_for(*g))
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        for granularity in Granularity::ALL {
            if self.parallelism_for(granularity) == 0 {
                return Err(PipelineError::Config(format!(
                    "parallelism for {} must be at least 1",
                    granularity
                )));
            }
        }

        if self.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.sink.call_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "sink.call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.redelivery.max_attempts == 0 {
            return Err(PipelineError::Config(
                "redelivery.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
