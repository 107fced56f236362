//! Queue message payload.
//!
//! The queue only carries the job id; the job record is the source of truth
//! for params and status.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
}

impl JobMessage {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }

    /// Serialize to the JSON body sent over the queue.
    pub fn encode(&self) -> String {
        // A struct holding a single UUID always serializes.
        serde_json::json!({ "job_id": self.job_id }).to_string()
    }

    pub fn decode(body: &str) -> Result<Self, CoreError> {
        serde_json::from_str(body)
            .map_err(|e| CoreError::Validation(format!("Malformed job message: {e}")))
    }
}
