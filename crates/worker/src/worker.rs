//! The per-message execution algorithm.
//!
//! ```text
//! decode -> guard (missing / terminal => ack) -> claim
//!        -> heartbeat + run task on blocking pool
//!        -> finalize record -> stop heartbeat -> ack | release | leave
//! ```
//!
//! Every record write after the claim is fenced by the claimed attempt
//! number, so a stale attempt can never overwrite a newer one.

use std::sync::Arc;
use std::time::Duration;

use simjob_core::job::JobFailure;
use simjob_core::keys::result_key;
use simjob_core::message::JobMessage;
use simjob_core::progress::ProgressEvent;
use simjob_core::types::JobId;
use simjob_db::{ClaimOutcome, JobStore, WriteOutcome};
use simjob_events::ProgressPublisher;
use simjob_pipeline::{TaskContext, TaskError, TaskFunction};
use simjob_queue::{Message, Queue};
use simjob_storage::ObjectStore;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::Heartbeat;
use crate::pool::{SlotState, SlotTracker};

// ---------------------------------------------------------------------------
// Settings and outcomes
// ---------------------------------------------------------------------------

/// Per-attempt execution settings.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_attempts: i32,
    /// Must be shorter than the queue's visibility window.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Undecodable body or unknown job; acked and dropped.
    Dropped,
    /// The job was already terminal; acked without touching it.
    AlreadyTerminal,
    /// Attempts exhausted; failed as a poison message and acked.
    Poisoned,
    Completed,
    /// Fatal task error; failed and acked.
    Failed,
    /// Cancelled externally; message released.
    Cancelled,
    /// Transient failure; message left to reappear after its window.
    Retrying,
    /// Worker shutting down; message released.
    Interrupted,
    /// A newer attempt owns the job; message left alone.
    Superseded,
}

/// What to do with the message once the record is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ack,
    Release,
    Leave,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn Queue>,
    objects: Arc<dyn ObjectStore>,
    publisher: ProgressPublisher,
    task: Arc<dyn TaskFunction>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn Queue>,
        objects: Arc<dyn ObjectStore>,
        publisher: ProgressPublisher,
        task: Arc<dyn TaskFunction>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            objects,
            publisher,
            task,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// Handle one delivery end to end. `shutdown` interrupts the task at its
    /// next progress checkpoint.
    pub async fn process_message(
        &self,
        message: Message,
        shutdown: &CancellationToken,
    ) -> ProcessOutcome {
        self.process_in_slot(message, &SlotTracker::detached(), shutdown)
            .await
    }

    pub(crate) async fn process_in_slot(
        &self,
        message: Message,
        slot: &SlotTracker,
        shutdown: &CancellationToken,
    ) -> ProcessOutcome {
        let job_id = match JobMessage::decode(&message.body) {
            Ok(decoded) => decoded.job_id,
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %e,
                    "Dropping undecodable message",
                );
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::Dropped;
            }
        };

        // Idempotency guard: redeliveries of finished jobs are acked untouched.
        match self.store.get(job_id).await {
            Ok(Some(job)) if job.is_terminal() => {
                tracing::info!(
                    job_id = %job_id,
                    status = %job.status,
                    "Job already terminal, acknowledging redelivery",
                );
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::AlreadyTerminal;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Message references unknown job, dropping");
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::Dropped;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job lookup failed, leaving message");
                return ProcessOutcome::Retrying;
            }
        }

        slot.set(SlotState::Claimed { job_id });
        let job = match self.store.claim(job_id, self.settings.max_attempts).await {
            Ok(ClaimOutcome::Claimed(job)) => job,
            Ok(ClaimOutcome::Poisoned(job)) => {
                tracing::error!(
                    job_id = %job_id,
                    attempts = job.attempts,
                    max_attempts = self.settings.max_attempts,
                    receive_count = message.receive_count,
                    "Poison message, failing job",
                );
                self.publisher.publish(ProgressEvent::from_job(&job));
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::Poisoned;
            }
            Ok(ClaimOutcome::AlreadyTerminal(_)) => {
                tracing::info!(job_id = %job_id, "Job finished before claim, acknowledging");
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::AlreadyTerminal;
            }
            Ok(ClaimOutcome::NotFound) => {
                self.settle(&message, Disposition::Ack).await;
                return ProcessOutcome::Dropped;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Claim failed, leaving message");
                return ProcessOutcome::Retrying;
            }
        };

        let attempt = job.attempts;
        tracing::info!(
            job_id = %job_id,
            attempt,
            receive_count = message.receive_count,
            task = self.task.name(),
            "Job claimed",
        );
        self.publisher.publish(ProgressEvent::from_job(&job));

        let heartbeat = Heartbeat::start(
            Arc::clone(&self.queue),
            message.clone(),
            self.settings.heartbeat_interval,
            job_id,
        );

        slot.set(SlotState::Running { job_id, attempt });
        let result = self.execute(job_id, attempt, job.params, shutdown).await;

        slot.set(SlotState::Finalizing { job_id });
        let (outcome, disposition) = match result {
            Ok(value) => self.finish_success(job_id, attempt, value).await,
            Err(e) => self.finish_error(job_id, attempt, e).await,
        };

        let beats = heartbeat.stop().await;
        self.settle(&message, disposition).await;

        tracing::info!(
            job_id = %job_id,
            attempt,
            heartbeats = beats,
            outcome = ?outcome,
            "Attempt finished",
        );
        outcome
    }

    /// Run the task on the blocking pool. A panic counts as a fatal error.
    async fn execute(
        &self,
        job_id: JobId,
        attempt: i32,
        params: serde_json::Value,
        shutdown: &CancellationToken,
    ) -> Result<serde_json::Value, TaskError> {
        let task = Arc::clone(&self.task);
        let mut ctx = TaskContext::new(
            Handle::current(),
            Arc::clone(&self.store),
            self.publisher.clone(),
            shutdown.clone(),
            job_id,
            attempt,
        );

        match tokio::task::spawn_blocking(move || task.run(&params, &mut ctx)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(TaskError::Fatal(format!("Task panicked: {reason}")))
            }
            Err(e) => Err(TaskError::Transient(e.to_string())),
        }
    }

    async fn finish_success(
        &self,
        job_id: JobId,
        attempt: i32,
        value: serde_json::Value,
    ) -> (ProcessOutcome, Disposition) {
        let key = result_key(job_id);
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => return self.finish_error(job_id, attempt, TaskError::Fatal(e.to_string())).await,
        };

        if let Err(e) = self.objects.put(&key, bytes).await {
            tracing::warn!(job_id = %job_id, attempt, error = %e, "Artifact write failed");
            return (ProcessOutcome::Retrying, Disposition::Leave);
        }

        match self.store.complete(job_id, attempt, &key).await {
            Ok(outcome) => self.on_final_write(job_id, attempt, outcome, ProcessOutcome::Completed),
            Err(e) => {
                tracing::warn!(job_id = %job_id, attempt, error = %e, "Completion write failed");
                (ProcessOutcome::Retrying, Disposition::Leave)
            }
        }
    }

    async fn finish_error(
        &self,
        job_id: JobId,
        attempt: i32,
        error: TaskError,
    ) -> (ProcessOutcome, Disposition) {
        match error {
            TaskError::Fatal(reason) => {
                tracing::error!(job_id = %job_id, attempt, error = %reason, "Task failed");
                let failure = JobFailure::task(reason, attempt);
                match self.store.fail(job_id, attempt, &failure).await {
                    Ok(outcome) => {
                        self.on_final_write(job_id, attempt, outcome, ProcessOutcome::Failed)
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, attempt, error = %e, "Failure write failed");
                        (ProcessOutcome::Retrying, Disposition::Leave)
                    }
                }
            }
            TaskError::Transient(reason) => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    error = %reason,
                    "Transient task error, message will be redelivered",
                );
                (ProcessOutcome::Retrying, Disposition::Leave)
            }
            TaskError::Cancelled => {
                match self.store.get(job_id).await {
                    Ok(Some(job)) => self.publisher.publish(ProgressEvent::from_job(&job)),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Could not load cancelled job");
                    }
                }
                (ProcessOutcome::Cancelled, Disposition::Release)
            }
            TaskError::Interrupted => {
                tracing::info!(job_id = %job_id, attempt, "Attempt interrupted by shutdown");
                (ProcessOutcome::Interrupted, Disposition::Release)
            }
            TaskError::Superseded => (ProcessOutcome::Superseded, Disposition::Leave),
        }
    }

    /// Publish and classify the result of a terminal record write.
    fn on_final_write(
        &self,
        job_id: JobId,
        attempt: i32,
        outcome: WriteOutcome,
        applied: ProcessOutcome,
    ) -> (ProcessOutcome, Disposition) {
        match outcome {
            WriteOutcome::Applied(job) => {
                self.publisher.publish(ProgressEvent::from_job(&job));
                (applied, Disposition::Ack)
            }
            WriteOutcome::Cancelled(job) => {
                tracing::info!(job_id = %job_id, attempt, "Job cancelled before finalization");
                self.publisher.publish(ProgressEvent::from_job(&job));
                (ProcessOutcome::Cancelled, Disposition::Release)
            }
            WriteOutcome::Superseded(_) | WriteOutcome::NotFound => {
                tracing::warn!(job_id = %job_id, attempt, "Attempt superseded at finalization");
                (ProcessOutcome::Superseded, Disposition::Leave)
            }
        }
    }

    async fn settle(&self, message: &Message, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => self.queue.ack(message).await,
            Disposition::Release => self.queue.release(message).await,
            Disposition::Leave => return,
        };
        if let Err(e) = result {
            tracing::warn!(
                message_id = %message.id,
                disposition = ?disposition,
                error = %e,
                "Failed to settle message",
            );
        }
    }
}
