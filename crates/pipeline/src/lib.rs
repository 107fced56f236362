//! Task execution contract and the job submission facade.
//!
//! - [`task`]: the pluggable [`TaskFunction`] and the [`TaskContext`] it
//!   reports progress through.
//! - [`service`]: [`JobService`], which validates, records, and enqueues
//!   submissions and answers status and cancellation requests.

pub mod service;
pub mod task;

pub use service::JobService;
pub use task::{TaskContext, TaskError, TaskFunction};
