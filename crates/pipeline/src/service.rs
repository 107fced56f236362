//! Job submission facade.
//!
//! Shared by every client-facing surface. Submission validates params
//! against the task's schema before anything is written, so rejected
//! requests leave no record behind.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use simjob_core::error::CoreError;
use simjob_core::job::{Job, JobFailure, JobListQuery};
use simjob_core::message::JobMessage;
use simjob_core::progress::ProgressEvent;
use simjob_core::schema::ParamSchema;
use simjob_core::types::{new_job_id, JobId};
use simjob_db::{CancelOutcome, JobStore};
use simjob_events::ProgressPublisher;
use simjob_queue::{Queue, QueueDepth};

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn Queue>,
    publisher: ProgressPublisher,
    schema: ParamSchema,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn Queue>,
        publisher: ProgressPublisher,
        schema: ParamSchema,
    ) -> Self {
        Self {
            store,
            queue,
            publisher,
            schema,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate, record as `queued`, and enqueue a new job.
    ///
    /// When the queue rejects the message the job is marked `failed` with a
    /// transport error so it is never left `queued` with nothing to run it.
    pub async fn submit(&self, params: Value) -> Result<JobId, CoreError> {
        self.schema.validate(&params)?;

        let job = Job::new(new_job_id(), params, Utc::now());
        let job = self.store.create(&job).await?;

        let body = JobMessage::new(job.id).encode();
        if let Err(e) = self.queue.enqueue(&body).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            let failure = JobFailure::transport(format!("Enqueue failed: {e}"));
            if let Err(store_err) = self.store.fail_queued(job.id, &failure).await {
                tracing::error!(
                    job_id = %job.id,
                    error = %store_err,
                    "Failed to record enqueue failure",
                );
            }
            return Err(CoreError::Transport(e.to_string()));
        }

        tracing::info!(job_id = %job.id, "Job submitted");
        Ok(job.id)
    }

    /// Current record for `job_id`.
    pub async fn get_status(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))
    }

    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        Ok(self.store.list(query).await?)
    }

    /// Cancel a queued or running job.
    ///
    /// Cancellation is cooperative: a running task stops at its next
    /// progress checkpoint. Cancelling a finished job is a no-op that
    /// returns [`CancelOutcome::AlreadyTerminal`].
    pub async fn request_cancel(&self, job_id: JobId) -> Result<CancelOutcome, CoreError> {
        match self.store.request_cancel(job_id).await? {
            CancelOutcome::NotFound => Err(CoreError::job_not_found(job_id)),
            CancelOutcome::Cancelled(job) => {
                tracing::info!(job_id = %job_id, "Job cancellation requested");
                self.publisher.publish(ProgressEvent::from_job(&job));
                Ok(CancelOutcome::Cancelled(job))
            }
            outcome @ CancelOutcome::AlreadyTerminal(_) => Ok(outcome),
        }
    }

    /// Queue depth, for health reporting and autoscaling.
    pub async fn queue_depth(&self) -> Result<QueueDepth, CoreError> {
        self.queue
            .depth()
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }
}
