use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use simjob_queue::QueueDepth;
use simjob_worker::SlotState;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the queue answered a depth query.
    pub queue_healthy: bool,
    /// Approximate queue depth, absent when the queue is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueDepth>,
    /// Embedded worker slots, absent when the gateway runs none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<Vec<SlotState>>,
    /// Open progress relay connections.
    pub relay_connections: usize,
}

/// GET /health -- returns service and queue health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = match state.jobs.queue_depth().await {
        Ok(depth) => Some(depth),
        Err(e) => {
            tracing::warn!(error = %e, "Queue depth query failed");
            None
        }
    };
    let queue_healthy = queue.is_some();

    let status = if queue_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        queue_healthy,
        queue,
        workers: state.worker_pool.as_ref().map(|pool| pool.slot_states()),
        relay_connections: state.relays.connection_count(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
