//! `simjob-worker` -- executes queued simulation jobs.
//!
//! Configuration is read from the environment; see
//! [`WorkerConfig::from_env`](simjob_worker::WorkerConfig::from_env).

use std::sync::Arc;

use simjob_events::ProgressPublisher;
use simjob_worker::backend::Backends;
use simjob_worker::tasks::PiEstimator;
use simjob_worker::{Worker, WorkerConfig, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simjob_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    config.validate().expect("Invalid worker configuration");
    tracing::info!(
        slots = config.slots,
        max_attempts = config.max_attempts,
        visibility_timeout_secs = config.visibility_timeout.as_secs(),
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        "Loaded worker configuration",
    );

    // --- Backends ---
    let backends = Backends::connect_shared(&config)
        .await
        .expect("Failed to initialise backends");

    // --- Worker pool ---
    let worker = Arc::new(Worker::new(
        backends.store,
        backends.queue,
        backends.objects,
        ProgressPublisher::default(),
        Arc::new(PiEstimator::new()),
        config.settings(),
    ));
    let pool = Arc::new(WorkerPool::new(worker, config.slots, config.receive_wait));

    let cancel = CancellationToken::new();
    let mut pool_handle = {
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(cancel).await })
    };

    tokio::select! {
        () = shutdown_signal() => {}
        _ = &mut pool_handle => {
            tracing::error!("Worker pool exited unexpectedly");
            return;
        }
    }

    // --- Graceful shutdown ---
    cancel.cancel();
    tracing::info!(
        slots = ?pool.slot_states(),
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Waiting for in-flight attempts to settle",
    );
    if tokio::time::timeout(config.shutdown_timeout, pool_handle)
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timeout elapsed with attempts still running");
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
