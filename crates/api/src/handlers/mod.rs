//! Request handlers.
//!
//! Handlers delegate to [`JobService`](simjob_pipeline::JobService) and map
//! errors via [`AppError`](crate::error::AppError).

pub mod jobs;
