//! At-least-once delivery
//!
//! Every inbound sample becomes a unit of work tracked by `AckingSource`.
//! A `Ticket` travels with the sample and with everything forwarded from
//! it; the unit is acked when the last clone drops cleanly and redelivered
//! when any holder failed it.

mod source;
mod ticket;

pub use source::{AckingSource, Delivery, RedeliveryPolicy, Resolution, SourceStats};
pub use ticket::{Outcome, Ticket, UnitId};
