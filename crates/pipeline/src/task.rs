//! The pluggable task function and its execution context.
//!
//! Task functions are synchronous and CPU-bound; the worker runs them on the
//! blocking pool. [`TaskContext`] bridges back into the async world to
//! persist progress and publish it, and doubles as the cooperative
//! cancellation checkpoint.

use std::sync::Arc;

use serde_json::Value;
use simjob_core::progress::ProgressEvent;
use simjob_core::schema::ParamSchema;
use simjob_core::types::JobId;
use simjob_db::{JobStore, WriteOutcome};
use simjob_events::ProgressPublisher;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// How a task execution ended, when it did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Retrying cannot help. The job is failed immediately.
    #[error("Task failed: {0}")]
    Fatal(String),

    /// Infrastructure hiccup. The message is left to reappear after its
    /// visibility window.
    #[error("Transient task error: {0}")]
    Transient(String),

    /// The job was cancelled externally.
    #[error("Job was cancelled")]
    Cancelled,

    /// A newer attempt owns the job.
    #[error("Job is owned by a newer attempt")]
    Superseded,

    /// The worker is shutting down.
    #[error("Worker is shutting down")]
    Interrupted,
}

// ---------------------------------------------------------------------------
// TaskFunction
// ---------------------------------------------------------------------------

/// A unit of CPU-bound work driven by a job's params.
pub trait TaskFunction: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Shape of the params this task accepts. Checked at submission.
    fn schema(&self) -> &ParamSchema;

    /// Execute the task. Called on a blocking thread.
    ///
    /// Implementations should call [`TaskContext::report_progress`]
    /// periodically and return promptly with its error when it fails.
    fn run(&self, params: &Value, ctx: &mut TaskContext) -> Result<Value, TaskError>;
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Per-attempt handle passed to [`TaskFunction::run`].
pub struct TaskContext {
    runtime: Handle,
    store: Arc<dyn JobStore>,
    publisher: ProgressPublisher,
    shutdown: CancellationToken,
    job_id: JobId,
    attempt: i32,
    progress: f64,
    checkpoints: u32,
}

impl TaskContext {
    pub fn new(
        runtime: Handle,
        store: Arc<dyn JobStore>,
        publisher: ProgressPublisher,
        shutdown: CancellationToken,
        job_id: JobId,
        attempt: i32,
    ) -> Self {
        Self {
            runtime,
            store,
            publisher,
            shutdown,
            job_id,
            attempt,
            progress: 0.0,
            checkpoints: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    /// Highest progress recorded so far in this attempt.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Number of successful progress writes in this attempt.
    pub fn checkpoints(&self) -> u32 {
        self.checkpoints
    }

    /// Record and publish progress `fraction`.
    ///
    /// The value is clamped to `[0, 1]` and never lowers previously reported
    /// progress. Must be called from a blocking thread, never from inside an
    /// async task.
    pub fn report_progress(&mut self, fraction: f64) -> Result<(), TaskError> {
        if self.shutdown.is_cancelled() {
            return Err(TaskError::Interrupted);
        }

        let fraction = if fraction.is_nan() {
            self.progress
        } else {
            fraction.clamp(0.0, 1.0).max(self.progress)
        };

        let outcome = self
            .runtime
            .block_on(self.store.update_progress(self.job_id, self.attempt, fraction))
            .map_err(|e| TaskError::Transient(format!("Progress write failed: {e}")))?;

        match outcome {
            WriteOutcome::Applied(job) => {
                self.progress = job.progress;
                self.checkpoints += 1;
                self.publisher.publish(ProgressEvent::from_job(&job));
                Ok(())
            }
            WriteOutcome::Cancelled(_) => {
                tracing::info!(
                    job_id = %self.job_id,
                    attempt = self.attempt,
                    "Cancellation observed at progress checkpoint",
                );
                Err(TaskError::Cancelled)
            }
            WriteOutcome::Superseded(_) | WriteOutcome::NotFound => {
                tracing::warn!(
                    job_id = %self.job_id,
                    attempt = self.attempt,
                    "Attempt superseded at progress checkpoint",
                );
                Err(TaskError::Superseded)
            }
        }
    }
}
