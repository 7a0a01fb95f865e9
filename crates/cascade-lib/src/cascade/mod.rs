//! Granularity cascade
//!
//! RAW → MINUTE → HOUR → DAY → WEEK → MONTH. Each stage is a fixed pool of
//! worker tasks; a key is always owned by the same worker of a stage, which
//! holds its state without locking. A stage forwards an aggregate to the
//! next one only when the key's window at that stage closes.

mod pipeline;
mod stage;
mod topology;
mod worker;

pub use pipeline::{Pipeline, RunExit};
pub use stage::Stage;
pub use topology::{CascadeHandle, StageCensus, StageHandle, Topology};
pub use worker::{StageMessage, WorkerCommand};

#[cfg(test)]
mod tests;
