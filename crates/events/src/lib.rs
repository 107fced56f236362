//! Live progress fan-out for running jobs.
//!
//! [`ProgressPublisher`] keeps one broadcast channel per observed job. The
//! worker publishes into it after every job-record write; gateway relays
//! subscribe per client. Delivery is best-effort and never replayed: the
//! job record stays the source of truth.

pub mod publisher;
pub mod relay;

pub use publisher::{ProgressPublisher, Subscription};
pub use relay::relay_stream;
