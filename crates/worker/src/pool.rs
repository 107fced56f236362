//! Bounded pool of execution slots.
//!
//! Each slot is a tokio task looping `receive -> process` against the shared
//! queue. Slots never share a message; scale-out beyond one process is just
//! more processes receiving from the same queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use simjob_core::types::JobId;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, BackoffConfig};
use crate::worker::Worker;

// ---------------------------------------------------------------------------
// Slot state
// ---------------------------------------------------------------------------

/// Where a slot is in `Idle -> Claimed -> Running -> Finalizing -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Claimed { job_id: JobId },
    Running { job_id: JobId, attempt: i32 },
    Finalizing { job_id: JobId },
}

/// Write side of one slot's observable state.
pub(crate) struct SlotTracker {
    tx: Option<Arc<watch::Sender<SlotState>>>,
}

impl SlotTracker {
    /// A tracker that records nothing, for messages processed outside a pool.
    pub(crate) fn detached() -> Self {
        Self { tx: None }
    }

    pub(crate) fn set(&self, state: SlotState) {
        if let Some(tx) = &self.tx {
            tx.send_replace(state);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    worker: Arc<Worker>,
    receive_wait: Duration,
    backoff: BackoffConfig,
    slots: Vec<Arc<watch::Sender<SlotState>>>,
}

impl WorkerPool {
    /// A pool of `slots` concurrent loops, each long-polling for up to
    /// `receive_wait` per receive.
    pub fn new(worker: Arc<Worker>, slots: usize, receive_wait: Duration) -> Self {
        let slots = (0..slots)
            .map(|_| Arc::new(watch::channel(SlotState::Idle).0))
            .collect();
        Self {
            worker,
            receive_wait,
            backoff: BackoffConfig::default(),
            slots,
        }
    }

    /// Current state of every slot, indexed by slot number.
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|tx| *tx.borrow()).collect()
    }

    /// Run every slot until `cancel` fires and in-flight attempts settle.
    ///
    /// On cancellation slots stop receiving; running tasks observe the
    /// shutdown at their next progress checkpoint and release their message.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(slots = self.slots.len(), "Worker pool started");

        let mut set = JoinSet::new();
        for (slot, tx) in self.slots.iter().enumerate() {
            let worker = Arc::clone(&self.worker);
            let tracker = SlotTracker {
                tx: Some(Arc::clone(tx)),
            };
            let cancel = cancel.clone();
            let receive_wait = self.receive_wait;
            let backoff = self.backoff;
            set.spawn(async move {
                run_slot(slot, worker, tracker, receive_wait, backoff, cancel).await;
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker slot terminated abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_slot(
    slot: usize,
    worker: Arc<Worker>,
    tracker: SlotTracker,
    receive_wait: Duration,
    backoff: BackoffConfig,
    cancel: CancellationToken,
) {
    let mut delay = backoff.initial_delay;
    tracing::debug!(slot, "Slot started");

    loop {
        tracker.set(SlotState::Idle);

        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = worker.queue().receive(receive_wait) => received,
        };

        match received {
            Ok(Some(message)) => {
                delay = backoff.initial_delay;
                let outcome = worker.process_in_slot(message, &tracker, &cancel).await;
                tracing::debug!(slot, outcome = ?outcome, "Message processed");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    slot,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Queue receive failed",
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, &backoff);
            }
        }
    }

    tracker.set(SlotState::Idle);
    tracing::debug!(slot, "Slot stopped");
}
