//! Axum handlers for the admin/health HTTP surface (§6: operator
//! interfaces) — liveness, readiness, Prometheus metrics, queue stats, and
//! worker registry snapshots.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::degradation::SystemHealthMonitor;
use crate::health_registry::HealthRegistry;
use crate::metrics;
use crate::store::JobStore;

#[derive(Clone)]
pub struct AdminState {
    pub redis: Arc<ConnectionManager>,
    pub app_name: String,
    pub app_version: String,
    pub store: Arc<dyn JobStore>,
    pub health_registry: Arc<HealthRegistry>,
    pub health_monitor: Arc<SystemHealthMonitor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

pub async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

pub async fn ready_handler(
    State(state): State<AdminState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut conn = (*state.redis).clone();
    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;

    match result {
        Ok(response) if response == "PONG" => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "redis": "ok" },
                "degradation_level": state.health_monitor.overall_level(),
            })),
        )),
        Ok(response) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("unexpected response: {}", response) }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("error: {}", e) }
            })),
        )),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics not initialized. Call job_core::metrics::init_metrics() at startup."
                .to_string(),
        )
            .into_response(),
    }
}

/// `GET /admin/queue-stats` — aggregate queue and job-state counts (§6).
pub async fn queue_stats_handler(
    State(state): State<AdminState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.stats().await {
        Ok(stats) => Ok(Json(json!(stats))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueStatsQuery {
    pub queue: String,
}

/// `GET /admin/queue-stats/single?queue=text_processing` — size and
/// oldest-job age for one ready queue (§4.A, §6).
pub async fn single_queue_stats_handler(
    State(state): State<AdminState>,
    Query(q): Query<QueueStatsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.queue_stats(&q.queue).await {
        Ok(stats) => Ok(Json(json!(stats))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `GET /admin/workers` — a snapshot of every known worker's health record.
pub async fn worker_registry_handler(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "workers": state.health_registry.snapshot() }))
}

pub fn admin_router(state: AdminState) -> axum::Router {
    use axum::{middleware, routing::get};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/queue-stats", get(queue_stats_handler))
        .route("/admin/queue-stats/single", get(single_queue_stats_handler))
        .route("/admin/workers", get(worker_registry_handler))
        .layer(middleware::from_fn(observability::metrics_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes_as_expected() {
        let response = HealthResponse {
            status: "healthy",
            name: "job-service".to_string(),
            version: "1.0.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
    }
}
