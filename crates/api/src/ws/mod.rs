//! WebSocket progress relay.
//!
//! One connection per observed job. The handler sends the stored snapshot
//! first and then forwards live events until the job reaches a terminal
//! status.

mod handler;
pub mod manager;

pub use handler::job_events_handler;
pub use manager::RelayManager;
