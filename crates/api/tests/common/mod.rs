//! Shared helpers for gateway integration tests: in-memory backends wired
//! into the production router.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use simjob_api::config::ServerConfig;
use simjob_api::router::build_app_router;
use simjob_api::state::AppState;
use simjob_api::ws::RelayManager;
use simjob_db::MemoryJobStore;
use simjob_events::ProgressPublisher;
use simjob_pipeline::{JobService, TaskFunction};
use simjob_queue::{MemoryQueue, Queue, QueueConfig};
use simjob_storage::MemoryObjectStore;
use simjob_worker::tasks::PiEstimator;
use simjob_worker::{ProcessOutcome, Worker, WorkerSettings};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        embedded_worker_slots: 0,
    }
}

/// Gateway wired to in-memory backends, plus a worker that tests drive by
/// hand so every transition happens at a known point.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub worker: Worker,
}

impl TestApp {
    /// Receive the next message and run it to a settled outcome.
    pub async fn run_next(&self) -> ProcessOutcome {
        let message = self
            .queue
            .receive(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("a message should be queued");
        self.worker
            .process_message(message, &CancellationToken::new())
            .await
    }
}

pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
    let publisher = ProgressPublisher::default();
    let task = Arc::new(PiEstimator::new());

    let jobs = Arc::new(JobService::new(
        store.clone(),
        queue.clone(),
        publisher.clone(),
        task.schema().clone(),
    ));
    let worker = Worker::new(
        store.clone(),
        queue.clone(),
        Arc::new(MemoryObjectStore::new()),
        publisher.clone(),
        task,
        WorkerSettings {
            max_attempts: 3,
            heartbeat_interval: Duration::from_secs(5),
        },
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs,
        publisher,
        relays: Arc::new(RelayManager::new()),
        worker_pool: None,
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        store,
        queue,
        worker,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
