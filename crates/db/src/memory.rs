//! In-process [`JobStore`] backed by a `HashMap` behind a `tokio::sync::RwLock`.
//!
//! Each operation holds the write lock for its whole read-check-write, which
//! gives the same compare-and-set semantics as the conditional `UPDATE`s of
//! the Postgres store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use simjob_core::job::{Job, JobFailure, JobListQuery, JobStatus};
use simjob_core::types::JobId;
use tokio::sync::RwLock;

use crate::store::{CancelOutcome, ClaimOutcome, JobStore, StoreError, WriteOutcome};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Apply `write` to the job if `attempt` still owns it and it is running.
    async fn owned_write(
        &self,
        id: JobId,
        attempt: i32,
        write: impl FnOnce(&mut Job),
    ) -> WriteOutcome {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return WriteOutcome::NotFound;
        };
        if job.status == JobStatus::Cancelled {
            return WriteOutcome::Cancelled(job.clone());
        }
        if job.status != JobStatus::Running || job.attempts != attempt {
            return WriteOutcome::Superseded(job.clone());
        }
        let from = job.status;
        write(job);
        debug_assert!(from.can_transition_to(job.status), "{from} -> {}", job.status);
        job.updated_at = Utc::now();
        WriteOutcome::Applied(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        let (limit, offset) = query.page();
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn claim(&self, id: JobId, max_attempts: i32) -> Result<ClaimOutcome, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if !job.status.can_transition_to(JobStatus::Running) {
            return Ok(ClaimOutcome::AlreadyTerminal(job.clone()));
        }

        let now = Utc::now();
        job.attempts += 1;
        job.progress = 0.0;
        job.updated_at = now;

        if job.attempts > max_attempts {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            job.error = Some(JobFailure::poison(job.attempts, max_attempts));
            return Ok(ClaimOutcome::Poisoned(job.clone()));
        }

        job.status = JobStatus::Running;
        job.started_at.get_or_insert(now);
        Ok(ClaimOutcome::Claimed(job.clone()))
    }

    async fn update_progress(
        &self,
        id: JobId,
        attempt: i32,
        progress: f64,
    ) -> Result<WriteOutcome, StoreError> {
        let progress = progress.clamp(0.0, 1.0);
        Ok(self
            .owned_write(id, attempt, |job| job.progress = job.progress.max(progress))
            .await)
    }

    async fn complete(
        &self,
        id: JobId,
        attempt: i32,
        result_ref: &str,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self
            .owned_write(id, attempt, |job| {
                job.status = JobStatus::Completed;
                job.progress = 1.0;
                job.result_ref = Some(result_ref.to_string());
                job.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn fail(
        &self,
        id: JobId,
        attempt: i32,
        failure: &JobFailure,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self
            .owned_write(id, attempt, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(failure.clone());
                job.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn fail_queued(
        &self,
        id: JobId,
        failure: &JobFailure,
    ) -> Result<WriteOutcome, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(WriteOutcome::NotFound);
        };
        match job.status {
            JobStatus::Queued => {
                let now = Utc::now();
                job.status = JobStatus::Failed;
                job.error = Some(failure.clone());
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(WriteOutcome::Applied(job.clone()))
            }
            JobStatus::Cancelled => Ok(WriteOutcome::Cancelled(job.clone())),
            _ => Ok(WriteOutcome::Superseded(job.clone())),
        }
    }

    async fn request_cancel(&self, id: JobId) -> Result<CancelOutcome, StoreError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if !job.status.can_transition_to(JobStatus::Cancelled) {
            return Ok(CancelOutcome::AlreadyTerminal(job.clone()));
        }
        let now = Utc::now();
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(CancelOutcome::Cancelled(job.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
