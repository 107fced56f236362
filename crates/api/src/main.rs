use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simjob_events::ProgressPublisher;
use simjob_pipeline::{JobService, TaskFunction};
use simjob_worker::backend::Backends;
use simjob_worker::tasks::PiEstimator;
use simjob_worker::{Worker, WorkerConfig, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simjob_api::config::ServerConfig;
use simjob_api::router::{build_app_router, close_relays_on};
use simjob_api::state::AppState;
use simjob_api::ws::RelayManager;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simjob_api=debug,simjob_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let worker_config = WorkerConfig::from_env();
    worker_config
        .validate()
        .expect("Invalid worker configuration");

    // --- Backends ---
    let backends = Backends::connect(&worker_config)
        .await
        .expect("Failed to initialise backends");

    let task = Arc::new(PiEstimator::new());
    let publisher = ProgressPublisher::default();
    let jobs = Arc::new(JobService::new(
        Arc::clone(&backends.store),
        Arc::clone(&backends.queue),
        publisher.clone(),
        task.schema().clone(),
    ));

    // --- Embedded workers ---
    let worker_cancel = CancellationToken::new();
    let (worker_pool, pool_handle) = if config.embedded_worker_slots > 0 {
        let worker = Arc::new(Worker::new(
            backends.store,
            backends.queue,
            backends.objects,
            publisher.clone(),
            task,
            worker_config.settings(),
        ));
        let pool = Arc::new(WorkerPool::new(
            worker,
            config.embedded_worker_slots,
            worker_config.receive_wait,
        ));
        let handle = {
            let pool = Arc::clone(&pool);
            let cancel = worker_cancel.clone();
            tokio::spawn(async move { pool.run(cancel).await })
        };
        tracing::info!(slots = config.embedded_worker_slots, "Embedded worker pool started");
        (Some(pool), Some(handle))
    } else {
        tracing::info!("No embedded workers; progress relays only see local events");
        (None, None)
    };

    // --- App state ---
    let relays = Arc::new(RelayManager::new());
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs,
        publisher,
        relays: Arc::clone(&relays),
        worker_pool,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(close_relays_on(Arc::clone(&relays), shutdown_signal()))
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    worker_cancel.cancel();
    if let Some(handle) = pool_handle {
        let timeout = Duration::from_secs(config.shutdown_timeout_secs);
        if tokio::time::timeout(timeout, handle).await.is_err() {
            tracing::warn!("Shutdown timeout elapsed with attempts still running");
        }
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
