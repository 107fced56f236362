//! Progress events fanned out to live observers of a job.
//!
//! Events are advisory: the job record is authoritative, and an event is
//! always emitted after the corresponding record write.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobFailure, JobStatus};
use crate::types::{JobId, Timestamp};

/// Progress update during job execution.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled.
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";

/// Snapshot of a job's status and progress at the moment it was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub attempt: i32,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub emitted_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl ProgressEvent {
    /// Build an event mirroring the given job record.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            attempt: job.attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            emitted_at: Utc::now(),
            error: job.error.clone(),
        }
    }

    /// Terminal events close the stream for every subscriber.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// WebSocket message type tag for this event.
    pub fn message_type(&self) -> &'static str {
        match self.status {
            JobStatus::Completed => MSG_TYPE_JOB_COMPLETED,
            JobStatus::Failed => MSG_TYPE_JOB_FAILED,
            JobStatus::Cancelled => MSG_TYPE_JOB_CANCELLED,
            JobStatus::Queued | JobStatus::Running => MSG_TYPE_JOB_PROGRESS,
        }
    }

    /// JSON envelope `{ "type": ..., ...event }` sent to relay clients.
    pub fn to_message(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("type".into(), self.message_type().into());
        }
        value
    }
}
