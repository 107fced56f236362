//! Monte Carlo estimate of pi.
//!
//! A reference workload: each run throws `samples_per_run` random points at
//! the unit square and counts those inside the quarter circle. Progress is
//! reported at every quarter of the runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use simjob_core::schema::{Field, ParamSchema};
use simjob_pipeline::{TaskContext, TaskError, TaskFunction};

const MAX_RUNS: f64 = 1_000_000.0;
const MAX_SAMPLES_PER_RUN: f64 = 1_000_000.0;
const DEFAULT_SAMPLES_PER_RUN: u64 = 10_000;

/// Progress is reported at each of these many equal fractions.
const CHECKPOINTS: u64 = 4;

pub struct PiEstimator {
    schema: ParamSchema,
}

impl PiEstimator {
    pub fn new() -> Self {
        let schema = ParamSchema::new()
            .field(Field::integer("runs").required().min(1.0).max(MAX_RUNS))
            .field(
                Field::integer("samples_per_run")
                    .min(1.0)
                    .max(MAX_SAMPLES_PER_RUN),
            )
            .field(Field::integer("seed").min(0.0))
            .deny_unknown_fields();
        Self { schema }
    }
}

impl Default for PiEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFunction for PiEstimator {
    fn name(&self) -> &str {
        "pi_estimator"
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    fn run(&self, params: &Value, ctx: &mut TaskContext) -> Result<Value, TaskError> {
        let runs = params["runs"]
            .as_u64()
            .filter(|&r| r >= 1)
            .ok_or_else(|| TaskError::Fatal("'runs' must be a positive integer".into()))?;
        let samples = params["samples_per_run"]
            .as_u64()
            .unwrap_or(DEFAULT_SAMPLES_PER_RUN)
            .max(1);
        let seed = params["seed"]
            .as_u64()
            .unwrap_or_else(|| rand::rng().random());

        let mut rng = StdRng::seed_from_u64(seed);
        let mut estimates = Vec::with_capacity(runs as usize);
        let mut next_mark = 1;

        for run in 1..=runs {
            let inside = (0..samples)
                .filter(|_| {
                    let x: f64 = rng.random();
                    let y: f64 = rng.random();
                    x * x + y * y <= 1.0
                })
                .count();
            estimates.push(4.0 * inside as f64 / samples as f64);

            while next_mark <= CHECKPOINTS && run * CHECKPOINTS >= next_mark * runs {
                ctx.report_progress(next_mark as f64 / CHECKPOINTS as f64)?;
                next_mark += 1;
            }
        }

        let n = estimates.len() as f64;
        let mean = estimates.iter().sum::<f64>() / n;
        let variance = if estimates.len() > 1 {
            estimates.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };

        Ok(json!({
            "estimate": mean,
            "std_error": (variance / n).sqrt(),
            "runs": runs,
            "samples_per_run": samples,
            "seed": seed,
        }))
    }
}
