//! Job execution: the per-message worker algorithm and the slot pool that
//! drives it.
//!
//! A [`Worker`](worker::Worker) turns one queue delivery into at most one
//! attempt of a job: claim, run the task on the blocking pool while a
//! heartbeat keeps the message invisible, then finalize the record and ack,
//! release, or abandon the message. A [`WorkerPool`](pool::WorkerPool)
//! runs a fixed number of those loops side by side.

pub mod backend;
pub mod backoff;
pub mod config;
pub mod heartbeat;
pub mod pool;
pub mod tasks;
pub mod worker;

pub use config::WorkerConfig;
pub use pool::{SlotState, WorkerPool};
pub use worker::{ProcessOutcome, Worker, WorkerSettings};
