//! Streaming statistics
//!
//! This module provides:
//! - `StreamState`, the per-(key, granularity) statistics record
//! - `StateTable`, the arena of states owned by one worker
//! - `StatisticsEngine`, which folds samples and classifies anomalies

mod engine;
mod state;

pub use engine::{AnomalyThresholds, EngineConfig, StatisticsEngine};
pub use state::{StateTable, StreamState};
