//! The [`JobStore`] contract and its write outcomes.

use async_trait::async_trait;
use simjob_core::error::CoreError;
use simjob_core::job::{Job, JobFailure, JobListQuery};
use simjob_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(JobId),

    /// A stored row could not be mapped back to a [`Job`].
    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => CoreError::Conflict(format!("Job {id} already exists")),
            StoreError::Database(e) => CoreError::Transport(e.to_string()),
            StoreError::Corrupt(msg) => CoreError::Internal(msg),
        }
    }
}

/// Result of trying to claim a job for a new attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The job is now `running`; `job.attempts` is the attempt number that
    /// fences every later write of this execution.
    Claimed(Job),
    /// The claim pushed `attempts` past the maximum; the job is now `failed`
    /// with a poison-message error.
    Poisoned(Job),
    /// The job was already completed, failed, or cancelled. Nothing changed.
    AlreadyTerminal(Job),
    NotFound,
}

/// Result of an execution write (`update_progress`, `complete`, `fail`).
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied(Job),
    /// The job was cancelled externally; the write was not applied.
    Cancelled(Job),
    /// Another attempt owns the job, or it reached a terminal state by some
    /// other path. The write was not applied.
    Superseded(Job),
    NotFound,
}

/// Result of an external cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled(Job),
    /// Already finished; the request is a no-op.
    AlreadyTerminal(Job),
    NotFound,
}

/// Durable job metadata with compare-and-set transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. The only insert in a job's lifetime.
    async fn create(&self, job: &Job) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Newest first, filtered and paginated.
    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError>;

    /// Begin a new attempt: `queued | running -> running`, increments
    /// `attempts`, sets `started_at` if unset, resets `progress` to 0.
    /// Exceeding `max_attempts` fails the job instead.
    async fn claim(&self, id: JobId, max_attempts: i32) -> Result<ClaimOutcome, StoreError>;

    /// Record progress for the owning attempt. Progress never decreases
    /// within an attempt.
    async fn update_progress(
        &self,
        id: JobId,
        attempt: i32,
        progress: f64,
    ) -> Result<WriteOutcome, StoreError>;

    /// `running -> completed` for the owning attempt.
    async fn complete(
        &self,
        id: JobId,
        attempt: i32,
        result_ref: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// `running -> failed` for the owning attempt.
    async fn fail(
        &self,
        id: JobId,
        attempt: i32,
        failure: &JobFailure,
    ) -> Result<WriteOutcome, StoreError>;

    /// `queued -> failed`, used when the job never reached the queue.
    async fn fail_queued(&self, id: JobId, failure: &JobFailure)
        -> Result<WriteOutcome, StoreError>;

    /// `queued | running -> cancelled`. A no-op on terminal jobs.
    async fn request_cancel(&self, id: JobId) -> Result<CancelOutcome, StoreError>;
}
