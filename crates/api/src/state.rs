use std::sync::Arc;

use simjob_events::ProgressPublisher;
use simjob_pipeline::JobService;
use simjob_worker::WorkerPool;

use crate::config::ServerConfig;
use crate::ws::RelayManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; inner data is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Submission, status, and cancellation facade.
    pub jobs: Arc<JobService>,
    /// Progress fan-out. Only carries events from workers in this process.
    pub publisher: ProgressPublisher,
    /// Live WebSocket relays.
    pub relays: Arc<RelayManager>,
    /// Embedded execution slots, when the gateway runs its own workers.
    pub worker_pool: Option<Arc<WorkerPool>>,
}
