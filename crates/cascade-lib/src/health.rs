//! Health tracking for the pipeline service
//!
//! Components report their status here; the agent exposes the aggregate
//! on its liveness and readiness endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::SinkError;
use crate::models::Granularity;
use crate::reliability::SourceStats;
use crate::routing::WorkerId;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still processing, but losing or delaying work
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Judge the acknowledging source from its counters
    ///
    /// Dead-lettered units mean samples were lost for good.
    pub fn from_source_stats(stats: &SourceStats) -> Self {
        if stats.dead_lettered > 0 {
            Self::degraded(format!(
                "{} unit(s) dead-lettered after exhausting redelivery",
                stats.dead_lettered
            ))
        } else {
            Self::healthy()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SOURCE: &str = "source";
    pub const TOPOLOGY: &str = "topology";
    pub const PERSISTENCE_SINK: &str = "persistence_sink";
    pub const NOTIFICATION_SINK: &str = "notification_sink";
}

/// Shared registry of component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Pipeline not yet initialized".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

/// Runtime reporter feeding the cascade's components into a registry
///
/// Sink components only touch the registry when they flip between healthy
/// and degraded, so the hot path stays on two atomics.
#[derive(Debug, Clone)]
pub struct PipelineHealth {
    registry: HealthRegistry,
    persistence_failing: Arc<AtomicBool>,
    notification_failing: Arc<AtomicBool>,
}

impl PipelineHealth {
    pub fn new(registry: HealthRegistry) -> Self {
        Self {
            registry,
            persistence_failing: Arc::new(AtomicBool::new(false)),
            notification_failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    fn sink_flag(&self, component: &str) -> &AtomicBool {
        if component == components::NOTIFICATION_SINK {
            &self.notification_failing
        } else {
            &self.persistence_failing
        }
    }

    /// A sink call exhausted its retry budget
    pub async fn sink_failed(&self, error: &SinkError) {
        let component = error.component();
        if !self.sink_flag(component).swap(true, Ordering::AcqRel) {
            self.registry
                .set_degraded(component, format!("Retries exhausted: {}", error))
                .await;
        }
    }

    /// A sink call succeeded
    pub async fn sink_succeeded(&self, component: &'static str) {
        if self.sink_flag(component).swap(false, Ordering::AcqRel) {
            self.registry.set_healthy(component).await;
        }
    }

    /// A stage worker stopped on a fatal error; its keys get no more samples
    pub async fn worker_stopped(&self, granularity: Granularity, worker: WorkerId, reason: &str) {
        self.registry
            .set_unhealthy(
                components::TOPOLOGY,
                format!("{} {} stopped: {}", granularity, worker, reason),
            )
            .await;
    }
}
