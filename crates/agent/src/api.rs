//! HTTP API for health checks, Prometheus metrics and pipeline stats

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cascade_lib::{
    health::{components, ComponentHealth, ComponentStatus, HealthRegistry},
    AckingSource, CascadeHandle, SourceStats, StageCensus,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub instance_name: String,
    pub health_registry: HealthRegistry,
    pub source: Arc<AckingSource>,
    pub cascade: CascadeHandle,
}

impl AppState {
    pub fn new(
        instance_name: impl Into<String>,
        health_registry: HealthRegistry,
        source: Arc<AckingSource>,
        cascade: CascadeHandle,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            health_registry,
            source,
            cascade,
        }
    }
}

/// Body of `/api/v1/stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance: String,
    pub source: SourceStats,
    pub stages: Vec<StageCensus>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check: 200 when healthy or degraded, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .health_registry
        .update(
            components::SOURCE,
            ComponentHealth::from_source_stats(&state.source.stats()),
        )
        .await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still processing
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check: 200 once the pipeline is running
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Source counters and per-tier state counts
async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.cascade.census().await {
        Ok(stages) => Json(StatsResponse {
            instance: state.instance_name.clone(),
            source: state.source.stats(),
            stages,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/stats", get(stats))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
