//! Handlers for the `/jobs` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use simjob_core::error::CoreError;
use simjob_core::job::{Job, JobListQuery};
use simjob_core::types::JobId;
use simjob_db::CancelOutcome;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    /// Task parameters, validated against the task's schema.
    pub params: serde_json::Value,
}

/// Response body for `POST /jobs/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job: Job,
    /// False when the job had already finished and nothing changed.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and enqueue a new job. Returns 201 with the `queued` record.
/// Invalid params are rejected with 400 and leave no record behind.
pub async fn submit_job(
    State(state): State<AppState>,
    input: Result<Json<SubmitJob>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = input.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job_id = state.jobs.submit(input.params).await?;
    let job = state.jobs.get_status(job_id).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs newest first. Supports optional `status`, `limit`, and
/// `offset` query parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.jobs.list(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get_status(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Request cancellation of a queued or running job. Cancelling a job that
/// already finished succeeds with `cancelled: false` and the unchanged record.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let response = match state.jobs.request_cancel(job_id).await? {
        CancelOutcome::Cancelled(job) => CancelResponse {
            job,
            cancelled: true,
        },
        CancelOutcome::AlreadyTerminal(job) => CancelResponse {
            job,
            cancelled: false,
        },
        // The service maps this to an error before returning.
        CancelOutcome::NotFound => return Err(CoreError::job_not_found(job_id).into()),
    };

    Ok(Json(DataResponse { data: response }))
}
