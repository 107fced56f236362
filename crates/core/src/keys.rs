//! Object-store key derivation.
//!
//! Keys are a pure function of the job id, so a retried attempt overwrites
//! the same artifact instead of leaving orphans behind.

use crate::types::JobId;

/// Prefix under which all result artifacts live.
pub const RESULTS_PREFIX: &str = "results";

/// Key of the result artifact for `job_id`.
pub fn result_key(job_id: JobId) -> String {
    format!("{RESULTS_PREFIX}/{job_id}.json")
}
