//! Shared domain types for the simjob pipeline.
//!
//! Everything here is pure logic with no I/O: the job record and its state
//! machine, progress events, queue message payloads, parameter schema
//! validation, and object-store key derivation. The storage, queue, worker,
//! and gateway crates all build on these types.

pub mod error;
pub mod job;
pub mod keys;
pub mod message;
pub mod progress;
pub mod schema;
pub mod types;
