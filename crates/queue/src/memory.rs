//! In-process [`Queue`] with visibility timeouts and dead-lettering.
//!
//! Long-polling receivers park on a [`Notify`] and wake when a message is
//! enqueued or released, or when the earliest in-flight message's
//! visibility deadline passes.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{Message, MessageId, Queue, QueueConfig, QueueDepth, QueueError};

struct Entry {
    id: MessageId,
    seq: u64,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    /// Receipt of the current delivery, `None` while never received or released.
    receipt: Option<Uuid>,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    entries: Vec<Entry>,
    dead_letters: Vec<Entry>,
}

impl State {
    /// Move visible messages that exhausted their deliveries to the dead-letter list.
    fn redrive(&mut self, now: Instant, max_receive_count: u32) {
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &self.entries[i];
            if entry.visible_at <= now && entry.receive_count >= max_receive_count {
                let entry = self.entries.remove(i);
                tracing::warn!(
                    message_id = %entry.id,
                    receive_count = entry.receive_count,
                    "Message moved to dead-letter queue",
                );
                self.dead_letters.push(entry);
            } else {
                i += 1;
            }
        }
    }

    fn deliver(&mut self, now: Instant, visibility: Duration) -> Option<Message> {
        let entry = self
            .entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| e.seq)?;
        let receipt = Uuid::new_v4();
        entry.receive_count += 1;
        entry.receipt = Some(receipt);
        entry.visible_at = now + visibility;
        Some(Message {
            id: entry.id,
            receipt,
            body: entry.body.clone(),
            receive_count: entry.receive_count,
        })
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.visible_at).min()
    }

    fn current_delivery(&mut self, message: &Message) -> Result<&mut Entry, QueueError> {
        self.entries
            .iter_mut()
            .find(|e| e.id == message.id && e.receipt == Some(message.receipt))
            .ok_or(QueueError::ReceiptExpired(message.id))
    }
}

pub struct MemoryQueue {
    config: QueueConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Bodies of messages that were moved to the dead-letter target.
    pub async fn dead_letters(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.dead_letters.iter().map(|e| e.body.clone()).collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, body: &str) -> Result<MessageId, QueueError> {
        let id = Uuid::now_v7();
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Entry {
                id,
                seq,
                body: body.to_string(),
                visible_at: Instant::now(),
                receive_count: 0,
                receipt: None,
            });
        }
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<Message>, QueueError> {
        let deadline = Instant::now() + max_wait;

        loop {
            // Register for wakeups before inspecting state so an enqueue that
            // lands in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_visible = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.redrive(now, self.config.max_receive_count);
                if let Some(message) = state.deliver(now, self.config.visibility_timeout) {
                    return Ok(Some(message));
                }
                state.next_visible_at()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn heartbeat(&self, message: &Message) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entry = state.current_delivery(message)?;
        entry.visible_at = Instant::now() + self.config.visibility_timeout;
        Ok(())
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.current_delivery(message)?;
        state.entries.retain(|e| e.id != message.id);
        Ok(())
    }

    async fn release(&self, message: &Message) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let entry = state.current_delivery(message)?;
            entry.visible_at = Instant::now();
            entry.receipt = None;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let state = self.state.lock().await;
        let now = Instant::now();
        let visible = state.entries.iter().filter(|e| e.visible_at <= now).count() as u64;
        Ok(QueueDepth {
            visible,
            in_flight: state.entries.len() as u64 - visible,
            dead_lettered: state.dead_letters.len() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
