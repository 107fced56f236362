//! The job record and its status state machine.
//!
//! Allowed transitions:
//!
//! ```text
//! queued  -> running | failed | cancelled
//! running -> running | completed | failed | cancelled
//! ```
//!
//! `running -> running` is the re-claim of a redelivered message. Nothing
//! leaves `completed`, `failed`, or `cancelled`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [JobStatus; 3] =
    [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// The lowercase name stored in the database and sent over the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Statuses from which `self` may be entered, in declaration order.
    pub fn entered_from(self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Why a job ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailureKind {
    /// The task function reported a fatal error.
    Task,
    /// Claims exceeded the configured maximum number of attempts.
    PoisonMessage,
    /// The job could not be handed to the queue.
    Transport,
}

/// Structured failure reason recorded on a `failed` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: JobFailureKind,
    pub message: String,
    /// Attempt number during which the failure was recorded (0 if never claimed).
    pub attempt: i32,
}

impl JobFailure {
    pub fn task(message: impl Into<String>, attempt: i32) -> Self {
        Self {
            kind: JobFailureKind::Task,
            message: message.into(),
            attempt,
        }
    }

    pub fn poison(attempts: i32, max_attempts: i32) -> Self {
        Self {
            kind: JobFailureKind::PoisonMessage,
            message: format!("Attempt {attempts} exceeds the maximum of {max_attempts}"),
            attempt: attempts,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: JobFailureKind::Transport,
            message: message.into(),
            attempt: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The durable record of one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Task-specific configuration, passed to the task function uninterpreted.
    pub params: serde_json::Value,
    pub status: JobStatus,
    /// Incremented on every claim, including redeliveries.
    pub attempts: i32,
    /// Fraction complete in `[0, 1]`. Only meaningful while `running`;
    /// resets to 0 on each claim.
    pub progress: f64,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    /// Object-store key of the result artifact. Set only on `completed`.
    pub result_ref: Option<String>,
    /// Set only on `failed`.
    pub error: Option<JobFailure>,
}

impl Job {
    /// Build a fresh `queued` record.
    pub fn new(id: JobId, params: serde_json::Value, now: Timestamp) -> Self {
        Self {
            id,
            params,
            status: JobStatus::Queued,
            attempts: 0,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            result_ref: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Filter and pagination for job listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

impl JobListQuery {
    /// Effective `(limit, offset)` after applying defaults and caps.
    pub fn page(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in TERMINAL_STATUSES {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn redelivery_may_reclaim_running_job() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn queued_cannot_complete_without_running() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn entered_from_lists_live_predecessors() {
        use JobStatus::*;
        assert_eq!(Running.entered_from(), vec![Queued, Running]);
        assert_eq!(Cancelled.entered_from(), vec![Queued, Running]);
        assert_eq!(Completed.entered_from(), vec![Running]);
        assert!(Queued.entered_from().is_empty());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["queued", "running", "completed", "failed", "cancelled"] {
            let status: JobStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert_matches!("paused".parse::<JobStatus>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(JobStatus::Cancelled).unwrap();
        assert_eq!(json, "cancelled");
    }

    #[test]
    fn poison_failure_carries_kind_and_attempt() {
        let f = JobFailure::poison(4, 3);
        assert_eq!(f.kind, JobFailureKind::PoisonMessage);
        assert_eq!(f.attempt, 4);
        assert_eq!(
            serde_json::to_value(f.kind).unwrap(),
            "poison_message"
        );
    }

    #[test]
    fn list_query_caps_limit() {
        let q = JobListQuery {
            status: None,
            limit: Some(10_000),
            offset: Some(-3),
        };
        assert_eq!(q.page(), (MAX_LIST_LIMIT, 0));
        assert_eq!(JobListQuery::default().page(), (DEFAULT_LIST_LIMIT, 0));
    }
}
