//! Durable job records.
//!
//! [`JobStore`] is the single source of truth for job status. Every write
//! after creation is a compare-and-set keyed on the job's current status
//! and, for execution writes, on the attempt number that owns the job.
//!
//! Two implementations:
//!
//! - [`MemoryJobStore`] for tests and single-process runs.
//! - [`PgJobStore`] backed by the `jobs` table.

pub mod memory;
pub mod postgres;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::{CancelOutcome, ClaimOutcome, JobStore, StoreError, WriteOutcome};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations (`jobs` and `job_queue` tables).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
