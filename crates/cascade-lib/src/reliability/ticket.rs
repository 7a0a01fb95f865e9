//! Acknowledgement tickets anchored to a unit of work

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use crate::models::Granularity;

/// Identifier of a unit of work, stable across redeliveries
pub type UnitId = u64;

/// Final resolution of one delivery of a unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Acked(UnitId),
    Failed {
        id: UnitId,
        /// Stage at which the delivery failed
        granularity: Granularity,
        reason: String,
    },
}

impl Outcome {
    pub fn id(&self) -> UnitId {
        match self {
            Outcome::Acked(id) => *id,
            Outcome::Failed { id, .. } => *id,
        }
    }
}

#[derive(Debug)]
struct Failure {
    granularity: Granularity,
    reason: String,
}

struct TicketInner {
    id: UnitId,
    failure: OnceLock<Failure>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
}

impl Drop for TicketInner {
    fn drop(&mut self) {
        let outcome = match self.failure.take() {
            Some(Failure {
                granularity,
                reason,
            }) => Outcome::Failed {
                id: self.id,
                granularity,
                reason,
            },
            None => Outcome::Acked(self.id),
        };
        // The source may already be gone during shutdown
        let _ = self.outcome_tx.send(outcome);
    }
}

/// Shared handle on one delivery of a unit of work
///
/// Every message derived from the unit carries a clone. The unit resolves
/// exactly once, when the last clone is dropped: acked if no holder called
/// `fail`, failed otherwise.
#[derive(Clone)]
pub struct Ticket {
    inner: Arc<TicketInner>,
}

impl Ticket {
    pub fn new(id: UnitId, outcome_tx: mpsc::UnboundedSender<Outcome>) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                id,
                failure: OnceLock::new(),
                outcome_tx,
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    /// Mark the unit as failed at `granularity`; the first failure wins
    pub fn fail(&self, granularity: Granularity, reason: impl Into<String>) {
        let _ = self.inner.failure.set(Failure {
            granularity,
            reason: reason.into(),
        });
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failure.get().is_some()
    }

    /// Number of live clones, including this one
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.inner.id)
            .field("failed", &self.is_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_when_last_clone_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticket = Ticket::new(7, tx);
        let branch = ticket.clone();
        assert_eq!(ticket.holders(), 2);

        drop(ticket);
        assert!(rx.try_recv().is_err());

        drop(branch);
        assert_eq!(rx.try_recv().unwrap(), Outcome::Acked(7));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_any_branch_failure_fails_unit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticket = Ticket::new(3, tx);
        let first = ticket.clone();
        let second = ticket.clone();
        drop(ticket);

        second.fail(Granularity::Hour, "persistence failed: disk full");
        first.fail(Granularity::Raw, "later failure");
        assert!(first.is_failed());
        drop(first);
        drop(second);

        let outcome = rx.try_recv().unwrap();
        assert_eq!(
            outcome,
            Outcome::Failed {
                id: 3,
                granularity: Granularity::Hour,
                reason: "persistence failed: disk full".to_string()
            }
        );
        assert_eq!(outcome.id(), 3);
    }

    #[test]
    fn test_drop_after_receiver_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let ticket = Ticket::new(1, tx);
        ticket.fail(Granularity::Raw, "ignored");
        drop(ticket);
    }
}
