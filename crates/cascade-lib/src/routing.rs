//! Deterministic key-to-worker routing
//!
//! Routing hashes the key's canonical string with xxh3, which is seedless, so
//! a key maps to the same worker across calls and across process restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{PipelineError, Result};
use crate::models::StreamKey;

/// Index of a worker within one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Which part of the key selects the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// Full key including criteria
    #[default]
    Key,
    /// Account and metric name; all criteria variants share a worker
    Metric,
    /// Every key goes to worker 0
    Global,
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "key" => Ok(Grouping::Key),
            "metric" => Ok(Grouping::Metric),
            "global" => Ok(Grouping::Global),
            other => Err(format!("unknown grouping '{}'", other)),
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grouping::Key => write!(f, "key"),
            Grouping::Metric => write!(f, "metric"),
            Grouping::Global => write!(f, "global"),
        }
    }
}

/// Routes stream keys onto a fixed number of workers
#[derive(Debug, Clone)]
pub struct Partitioner {
    workers: usize,
    grouping: Grouping,
}

impl Partitioner {
    pub fn new(workers: usize, grouping: Grouping) -> Result<Self> {
        if workers == 0 {
            return Err(PipelineError::Config(
                "partitioner needs at least one worker".to_string(),
            ));
        }
        Ok(Self { workers, grouping })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    /// Worker owning `key`
    pub fn route(&self, key: &StreamKey) -> WorkerId {
        let hash = match self.grouping {
            Grouping::Key => xxh3_64(key.canonical().as_bytes()),
            Grouping::Metric => xxh3_64(key.metric_prefix().as_bytes()),
            Grouping::Global => return WorkerId(0),
        };
        WorkerId((hash % self.workers as u64) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<StreamKey> {
        (0..200)
            .map(|i| {
                StreamKey::new(
                    format!("acct-{}", i % 7),
                    format!("metric-{}", i % 13),
                    [("RESOURCE_ID", format!("i-{}", i))],
                )
            })
            .collect()
    }

    #[test]
    fn test_route_is_stable_across_calls() {
        let partitioner = Partitioner::new(8, Grouping::Key).unwrap();

        for key in keys() {
            let first = partitioner.route(&key);
            for _ in 0..10 {
                assert_eq!(partitioner.route(&key), first);
            }
        }
    }

    #[test]
    fn test_route_is_stable_across_instances() {
        // Two partitioners stand in for two processes before and after a restart
        let before = Partitioner::new(8, Grouping::Key).unwrap();
        let after = Partitioner::new(8, Grouping::Key).unwrap();

        for key in keys() {
            let rebuilt = StreamKey::new(
                key.account_id().to_string(),
                key.metric_name().to_string(),
                key.criteria().clone(),
            );
            assert_eq!(before.route(&key), after.route(&rebuilt));
        }
    }

    #[test]
    fn test_route_is_pinned() {
        // Guards against a hash change silently reshuffling partitions
        let key = StreamKey::simple("acctA", "CPU");
        let expected = WorkerId((xxh3_64(b"acctA|CPU|") % 8) as usize);
        assert_eq!(Partitioner::new(8, Grouping::Key).unwrap().route(&key), expected);
    }

    #[test]
    fn test_route_within_bounds_and_spread() {
        let partitioner = Partitioner::new(8, Grouping::Key).unwrap();
        let mut used = std::collections::HashSet::new();

        for key in keys() {
            let worker = partitioner.route(&key);
            assert!(worker.0 < 8);
            used.insert(worker);
        }

        assert!(used.len() > 1);
    }

    #[test]
    fn test_metric_grouping_ignores_criteria() {
        let partitioner = Partitioner::new(16, Grouping::Metric).unwrap();
        let a = StreamKey::new("acct", "CPU", [("RESOURCE_ID", "i-1")]);
        let b = StreamKey::new("acct", "CPU", [("RESOURCE_ID", "i-2"), ("ZONE", "b")]);

        assert_eq!(partitioner.route(&a), partitioner.route(&b));
    }

    #[test]
    fn test_global_grouping_routes_to_first_worker() {
        let partitioner = Partitioner::new(4, Grouping::Global).unwrap();
        for key in keys() {
            assert_eq!(partitioner.route(&key), WorkerId(0));
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            Partitioner::new(0, Grouping::Key),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_grouping_parse() {
        assert_eq!("Metric".parse::<Grouping>().unwrap(), Grouping::Metric);
        assert!("random".parse::<Grouping>().is_err());
    }
}
