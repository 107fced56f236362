//! Visibility-extending heartbeat for an in-flight message.
//!
//! While an attempt runs, [`Heartbeat`] periodically calls
//! [`Queue::heartbeat`] so the message stays invisible to other consumers.
//! A stale receipt ends the heartbeat; other failures are logged and the
//! next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use simjob_core::types::JobId;
use simjob_queue::{Message, Queue, QueueError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<u32>,
}

impl Heartbeat {
    /// Spawn the heartbeat task. The first beat fires one `interval` from now.
    pub fn start(
        queue: Arc<dyn Queue>,
        message: Message,
        interval: Duration,
        job_id: JobId,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut beats = 0u32;
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match queue.heartbeat(&message).await {
                            Ok(()) => {
                                beats += 1;
                                tracing::trace!(job_id = %job_id, beats, "Heartbeat sent");
                            }
                            Err(QueueError::ReceiptExpired(_)) => {
                                tracing::warn!(
                                    job_id = %job_id,
                                    message_id = %message.id,
                                    "Receipt expired, stopping heartbeat",
                                );
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                            }
                        }
                    }
                }
            }
            beats
        });

        Self { cancel, handle }
    }

    /// Stop beating and return how many heartbeats succeeded.
    pub async fn stop(self) -> u32 {
        self.cancel.cancel();
        self.handle.await.unwrap_or(0)
    }
}
