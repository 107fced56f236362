//! simjob HTTP gateway library.
//!
//! Exposes config, state, error handling, routes, and the progress relay so
//! integration tests and the binary entrypoint share the same building
//! blocks.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
