//! [`JobStore`] backed by the `jobs` table.
//!
//! Every transition is one conditional `UPDATE ... RETURNING`. When the
//! condition does not hold the current row is re-read to classify why.

use async_trait::async_trait;
use simjob_core::job::{Job, JobFailure, JobListQuery, JobStatus};
use simjob_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::store::{CancelOutcome, ClaimOutcome, JobStore, StoreError, WriteOutcome};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, params, status, attempts, progress, \
    created_at, started_at, completed_at, updated_at, \
    result_ref, error";

/// A row from the `jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: JobId,
    params: serde_json::Value,
    status: String,
    attempts: i32,
    progress: f64,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    updated_at: Timestamp,
    result_ref: Option<String>,
    error: Option<Json<JobFailure>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {e}", row.id)))?;
        Ok(Job {
            id: row.id,
            params: row.params,
            status,
            attempts: row.attempts,
            progress: row.progress,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            result_ref: row.result_ref,
            error: row.error.map(|Json(f)| f),
        })
    }
}

fn into_job(row: Option<JobRow>) -> Result<Option<Job>, StoreError> {
    row.map(Job::try_from).transpose()
}

/// Stored names of the statuses a job may leave to enter `next`.
fn entry_statuses(next: JobStatus) -> Vec<String> {
    next.entered_from()
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classify an execution write whose conditional update matched no row.
    async fn rejected_write(&self, id: JobId) -> Result<WriteOutcome, StoreError> {
        Ok(match self.get(id).await? {
            None => WriteOutcome::NotFound,
            Some(job) if job.status == JobStatus::Cancelled => WriteOutcome::Cancelled(job),
            Some(job) => WriteOutcome::Superseded(job),
        })
    }

    async fn finish_write(
        &self,
        id: JobId,
        row: Option<JobRow>,
    ) -> Result<WriteOutcome, StoreError> {
        match into_job(row)? {
            Some(job) => Ok(WriteOutcome::Applied(job)),
            None => self.rejected_write(id).await,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO jobs (id, params, status, attempts, progress, created_at, updated_at) \
             VALUES ($1, $2, $3, 0, 0, $4, $4) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(&job.params)
            .bind(JobStatus::Queued.as_str())
            .bind(job.created_at)
            .fetch_optional(&self.pool)
            .await?;
        into_job(row)?.ok_or(StoreError::Duplicate(job.id))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        into_job(row)
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        let (limit, offset) = query.page();

        let (where_clause, bind_idx) = if query.status.is_some() {
            ("WHERE status = $1", 2)
        } else {
            ("", 1)
        };

        let sql = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, JobRow>(&sql);
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        let rows = q.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn claim(&self, id: JobId, max_attempts: i32) -> Result<ClaimOutcome, StoreError> {
        // Column references on the right-hand side see the pre-update row.
        let query = format!(
            "UPDATE jobs SET \
                 attempts = attempts + 1, \
                 progress = 0, \
                 status = CASE WHEN attempts + 1 > $2 THEN 'failed' ELSE 'running' END, \
                 started_at = CASE WHEN attempts + 1 > $2 THEN started_at \
                                   ELSE COALESCE(started_at, NOW()) END, \
                 completed_at = CASE WHEN attempts + 1 > $2 THEN NOW() ELSE NULL END, \
                 error = CASE WHEN attempts + 1 > $2 THEN jsonb_build_object( \
                             'kind', 'poison_message', \
                             'message', 'Attempt ' || (attempts + 1)::text || ' exceeds the maximum of ' || $2::text, \
                             'attempt', attempts + 1) \
                         ELSE NULL END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(max_attempts)
            .bind(entry_statuses(JobStatus::Running))
            .fetch_optional(&self.pool)
            .await?;

        match into_job(row)? {
            Some(job) if job.status == JobStatus::Failed => Ok(ClaimOutcome::Poisoned(job)),
            Some(job) => Ok(ClaimOutcome::Claimed(job)),
            None => Ok(match self.get(id).await? {
                Some(job) => ClaimOutcome::AlreadyTerminal(job),
                None => ClaimOutcome::NotFound,
            }),
        }
    }

    async fn update_progress(
        &self,
        id: JobId,
        attempt: i32,
        progress: f64,
    ) -> Result<WriteOutcome, StoreError> {
        let query = format!(
            "UPDATE jobs SET progress = GREATEST(progress, $3), updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'running' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(attempt)
            .bind(progress.clamp(0.0, 1.0))
            .fetch_optional(&self.pool)
            .await?;
        self.finish_write(id, row).await
    }

    async fn complete(
        &self,
        id: JobId,
        attempt: i32,
        result_ref: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let query = format!(
            "UPDATE jobs SET status = 'completed', progress = 1, result_ref = $3, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'running' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(attempt)
            .bind(result_ref)
            .fetch_optional(&self.pool)
            .await?;
        self.finish_write(id, row).await
    }

    async fn fail(
        &self,
        id: JobId,
        attempt: i32,
        failure: &JobFailure,
    ) -> Result<WriteOutcome, StoreError> {
        let query = format!(
            "UPDATE jobs SET status = 'failed', error = $3, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'running' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(attempt)
            .bind(Json(failure))
            .fetch_optional(&self.pool)
            .await?;
        self.finish_write(id, row).await
    }

    async fn fail_queued(
        &self,
        id: JobId,
        failure: &JobFailure,
    ) -> Result<WriteOutcome, StoreError> {
        let query = format!(
            "UPDATE jobs SET status = 'failed', error = $2, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'queued' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(Json(failure))
            .fetch_optional(&self.pool)
            .await?;
        self.finish_write(id, row).await
    }

    async fn request_cancel(&self, id: JobId) -> Result<CancelOutcome, StoreError> {
        let query = format!(
            "UPDATE jobs SET status = 'cancelled', completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = ANY($2) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(entry_statuses(JobStatus::Cancelled))
            .fetch_optional(&self.pool)
            .await?;

        match into_job(row)? {
            Some(job) => Ok(CancelOutcome::Cancelled(job)),
            None => Ok(match self.get(id).await? {
                Some(job) => CancelOutcome::AlreadyTerminal(job),
                None => CancelOutcome::NotFound,
            }),
        }
    }
}
