//! Acknowledging source: hands out tickets and redelivers failed units

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::ticket::{Outcome, Ticket, UnitId};
use crate::models::{Granularity, MetricSample};
use crate::observability::{PipelineMetrics, StructuredLogger};

/// Redelivery budget for failed units of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryPolicy {
    /// Total deliveries of one unit, including the first
    pub max_attempts: u32,
    /// Pause before a failed unit is delivered again (ms)
    pub redelivery_delay_ms: u64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            redelivery_delay_ms: 1_000,
        }
    }
}

impl RedeliveryPolicy {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

/// One delivery of a unit of work into the cascade
#[derive(Debug)]
pub struct Delivery {
    pub ticket: Ticket,
    pub sample: MetricSample,
    /// 1 for the first delivery
    pub attempt: u32,
    /// Coarsest stage an earlier delivery failed at; a redelivery must
    /// reach it again even where windows have since moved on
    pub replay_through: Option<Granularity>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// What the source decided for a resolved delivery
#[derive(Debug)]
pub enum Resolution {
    Acked,
    Redeliver(Delivery),
    DeadLettered,
    /// Outcome for a unit the source no longer tracks
    Unknown,
}

/// Counters describing the source since startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub emitted: u64,
    pub acked: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    pub in_flight: usize,
}

#[derive(Debug)]
struct InFlight {
    sample: MetricSample,
    attempt: u32,
    replay_through: Option<Granularity>,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    acked: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Tracks every unit of work from delivery until it is acked or dead-lettered
pub struct AckingSource {
    policy: RedeliveryPolicy,
    in_flight: DashMap<UnitId, InFlight>,
    next_id: AtomicU64,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    counters: Counters,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl AckingSource {
    /// Create a source; ticket outcomes arrive on the returned receiver
    pub fn new(
        policy: RedeliveryPolicy,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
    ) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let source = Self {
            policy,
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(1),
            outcome_tx,
            counters: Counters::default(),
            metrics,
            logger,
        };
        (source, outcome_rx)
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// Wrap a fresh sample in a unit of work
    pub fn emit(&self, sample: MetricSample) -> Delivery {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(
            id,
            InFlight {
                sample: sample.clone(),
                attempt: 1,
                replay_through: None,
            },
        );
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_units_in_flight(self.in_flight.len() as i64);

        Delivery {
            ticket: Ticket::new(id, self.outcome_tx.clone()),
            sample,
            attempt: 1,
            replay_through: None,
        }
    }

    /// Settle an outcome reported by a dropped ticket
    pub fn resolve(&self, outcome: Outcome) -> Resolution {
        let resolution = match outcome {
            Outcome::Acked(id) => match self.in_flight.remove(&id) {
                Some(_) => {
                    self.counters.acked.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_units_acked();
                    Resolution::Acked
                }
                None => Resolution::Unknown,
            },
            Outcome::Failed {
                id,
                granularity,
                reason,
            } => self.on_failure(id, granularity, &reason),
        };

        self.metrics.set_units_in_flight(self.in_flight.len() as i64);
        resolution
    }

    fn on_failure(&self, id: UnitId, granularity: Granularity, reason: &str) -> Resolution {
        let Some(mut entry) = self.in_flight.get_mut(&id) else {
            return Resolution::Unknown;
        };

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_units_failed();

        if entry.attempt >= self.policy.max_attempts {
            let attempts = entry.attempt;
            let key = entry.sample.key.to_string();
            drop(entry);
            self.in_flight.remove(&id);

            self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_units_dead_lettered();
            self.logger.log_dead_letter(id, attempts, &key, reason);
            return Resolution::DeadLettered;
        }

        entry.attempt += 1;
        entry.replay_through = entry.replay_through.max(Some(granularity));
        let delivery = Delivery {
            ticket: Ticket::new(id, self.outcome_tx.clone()),
            sample: entry.sample.clone(),
            attempt: entry.attempt,
            replay_through: entry.replay_through,
        };
        drop(entry);

        self.counters.redelivered.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_units_redelivered();
        self.logger.log_redelivery(id, delivery.attempt, reason);
        Resolution::Redeliver(delivery)
    }

    /// Units delivered but not yet acked or dead-lettered
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            redelivered: self.counters.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamKey;

    fn source(max_attempts: u32) -> (AckingSource, mpsc::UnboundedReceiver<Outcome>) {
        AckingSource::new(
            RedeliveryPolicy {
                max_attempts,
                redelivery_delay_ms: 0,
            },
            PipelineMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn sample(value: f64) -> MetricSample {
        MetricSample::new(StreamKey::simple("acct", "CPU"), 1_000, value)
    }

    #[test]
    fn test_ack_clears_in_flight() {
        let (source, mut outcomes) = source(3);

        let delivery = source.emit(sample(1.0));
        assert_eq!(delivery.attempt, 1);
        assert!(!delivery.is_redelivery());
        assert_eq!(source.pending(), 1);

        drop(delivery);
        let outcome = outcomes.try_recv().unwrap();
        assert!(matches!(source.resolve(outcome), Resolution::Acked));

        let stats = source.stats();
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_failure_redelivers_same_unit() {
        let (source, mut outcomes) = source(3);

        let first = source.emit(sample(4.0));
        let id = first.ticket.id();
        first.ticket.fail(Granularity::Hour, "boom");
        drop(first);

        let outcome = outcomes.try_recv().unwrap();
        let again = match source.resolve(outcome) {
            Resolution::Redeliver(delivery) => delivery,
            other => panic!("expected redelivery, got {:?}", other),
        };

        assert_eq!(again.ticket.id(), id);
        assert_eq!(again.attempt, 2);
        assert!(again.is_redelivery());
        assert_eq!(again.sample.value, 4.0);
        assert_eq!(again.replay_through, Some(Granularity::Hour));
        assert_eq!(source.pending(), 1);
        assert_eq!(source.stats().redelivered, 1);
    }

    #[test]
    fn test_replay_target_keeps_coarsest_failure() {
        let (source, mut outcomes) = source(5);

        let first = source.emit(sample(1.0));
        first.ticket.fail(Granularity::Day, "day sink down");
        drop(first);
        let second = match source.resolve(outcomes.try_recv().unwrap()) {
            Resolution::Redeliver(delivery) => delivery,
            other => panic!("expected redelivery, got {:?}", other),
        };

        second.ticket.fail(Granularity::Minute, "minute queue closed");
        drop(second);
        let third = match source.resolve(outcomes.try_recv().unwrap()) {
            Resolution::Redeliver(delivery) => delivery,
            other => panic!("expected redelivery, got {:?}", other),
        };

        assert_eq!(third.attempt, 3);
        assert_eq!(third.replay_through, Some(Granularity::Day));
    }

    #[test]
    fn test_dead_letter_after_max_attempts() {
        let (source, mut outcomes) = source(2);

        let mut delivery = source.emit(sample(1.0));
        let mut dead = false;
        for _ in 0..2 {
            delivery.ticket.fail(Granularity::Day, "still broken");
            drop(delivery);
            match source.resolve(outcomes.try_recv().unwrap()) {
                Resolution::Redeliver(next) => delivery = next,
                Resolution::DeadLettered => {
                    dead = true;
                    break;
                }
                other => panic!("unexpected resolution {:?}", other),
            }
        }

        assert!(dead);
        let stats = source.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.redelivered, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_unknown_outcome_ignored() {
        let (source, _outcomes) = source(3);
        assert!(matches!(
            source.resolve(Outcome::Acked(42)),
            Resolution::Unknown
        ));
        assert_eq!(source.stats(), SourceStats::default());
    }
}
