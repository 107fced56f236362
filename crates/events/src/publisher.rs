//! Per-job progress channels backed by `tokio::sync::broadcast`.
//!
//! A channel exists only while someone is subscribed to the job. Publishing
//! to a job nobody watches is a no-op, and a terminal event tears the
//! channel down after delivering itself to every live subscriber.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::Stream;
use simjob_core::progress::ProgressEvent;
use simjob_core::types::JobId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// ProgressPublisher
// ---------------------------------------------------------------------------

/// Default per-job buffer. Subscribers further behind than this skip events.
const DEFAULT_CAPACITY: usize = 64;

struct Channels {
    senders: RwLock<HashMap<JobId, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl Channels {
    /// Drop the job's channel if its last receiver has gone away.
    fn release_if_idle(&self, job_id: JobId) {
        let mut senders = self
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if senders
            .get(&job_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            senders.remove(&job_id);
            tracing::debug!(job_id = %job_id, "Released idle progress channel");
        }
    }
}

/// In-process fan-out of [`ProgressEvent`]s, keyed by job.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct ProgressPublisher {
    channels: Arc<Channels>,
}

impl ProgressPublisher {
    /// Create a publisher whose per-job buffers hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Channels {
                senders: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Deliver `event` to every current subscriber of its job.
    ///
    /// Never blocks on subscribers. Dropped silently when nobody is
    /// subscribed. A terminal event closes the job's channel.
    pub fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id;

        if event.is_terminal() {
            let sender = self
                .channels
                .senders
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job_id);
            if let Some(tx) = sender {
                let delivered = tx.send(event).unwrap_or(0);
                tracing::debug!(job_id = %job_id, delivered, "Published terminal progress event");
            }
            return;
        }

        let senders = self
            .channels
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = senders.get(&job_id) {
            // A send error only means every receiver has just been dropped.
            let _ = tx.send(event);
        }
    }

    /// Open a new subscription to `job_id`'s events.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let rx = self
            .channels
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.channels.capacity).0)
            .subscribe();

        Subscription {
            job_id,
            rx: Some(rx),
            channels: Arc::downgrade(&self.channels),
            finished: false,
        }
    }

    /// Release `job_id`'s channel. Live subscriptions end once drained.
    ///
    /// Safe to call repeatedly and for jobs that were never subscribed.
    pub fn unsubscribe(&self, job_id: JobId) {
        self.channels
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    /// Number of live subscriptions for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.channels
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of jobs with an open channel.
    pub fn active_jobs(&self) -> usize {
        self.channels
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One observer's view of a job's event sequence.
///
/// Ends after yielding a terminal event or when the job's channel is
/// released. Dropping it unsubscribes this observer only.
pub struct Subscription {
    job_id: JobId,
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    channels: Weak<Channels>,
    finished: bool,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let rx = self.rx.as_mut()?;

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        skipped,
                        "Progress subscriber lagged, skipping events",
                    );
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Adapt into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the idle check counts receivers.
        drop(self.rx.take());
        if let Some(channels) = self.channels.upgrade() {
            channels.release_if_idle(self.job_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
