//! Backend selection shared by the worker and gateway binaries.

use std::sync::Arc;

use simjob_db::{JobStore, MemoryJobStore, PgJobStore};
use simjob_queue::{MemoryQueue, PgQueue, Queue};
use simjob_storage::{LocalObjectStore, ObjectStore, S3ObjectStore};

use crate::config::{StorageConfig, WorkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("DATABASE_URL must be set: a standalone worker needs the store and queue shared with the gateway")]
    SharedBackendRequired,
}

/// The durable collaborators a worker (or gateway) runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn Queue>,
    pub objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

impl Backends {
    /// Like [`connect`](Self::connect), but refuses the in-memory fallback.
    ///
    /// A worker in its own process could never see jobs submitted elsewhere.
    pub async fn connect_shared(config: &WorkerConfig) -> Result<Self, BackendError> {
        if config.database_url.is_none() {
            return Err(BackendError::SharedBackendRequired);
        }
        Self::connect(config).await
    }

    /// Connect to Postgres when `database_url` is set, otherwise fall back to
    /// in-process store and queue (single-process deployments and demos).
    pub async fn connect(config: &WorkerConfig) -> Result<Self, BackendError> {
        let (store, queue): (Arc<dyn JobStore>, Arc<dyn Queue>) = match &config.database_url {
            Some(url) => {
                let pool = simjob_db::create_pool(url).await?;
                simjob_db::health_check(&pool).await?;
                simjob_db::run_migrations(&pool).await?;
                tracing::info!("Database connected and migrated");
                (
                    Arc::new(PgJobStore::new(pool.clone())),
                    Arc::new(PgQueue::new(pool, config.queue_config())),
                )
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set, using in-memory job store and queue \
                     visible only to this process"
                );
                (
                    Arc::new(MemoryJobStore::new()),
                    Arc::new(MemoryQueue::new(config.queue_config())),
                )
            }
        };

        let objects: Arc<dyn ObjectStore> = match &config.storage {
            StorageConfig::Local { path } => {
                tracing::info!(path = %path.display(), "Using local result storage");
                Arc::new(LocalObjectStore::new(path.clone()))
            }
            StorageConfig::S3 { bucket, endpoint } => {
                tracing::info!(bucket = %bucket, "Using S3 result storage");
                Arc::new(S3ObjectStore::from_env(bucket.clone(), endpoint.clone()).await)
            }
        };

        Ok(Self {
            store,
            queue,
            objects,
        })
    }
}
