//! Durable message queue adapter.
//!
//! The [`Queue`] trait models an at-least-once queue with visibility
//! timeouts: a received message is hidden from other consumers for one
//! visibility window, extended by [`Queue::heartbeat`], removed by
//! [`Queue::ack`], and made visible again by [`Queue::release`] or by the
//! window running out. After `max_receive_count` deliveries without an ack
//! the message moves to a dead-letter target and is never redelivered.
//!
//! - [`MemoryQueue`]: in-process implementation.
//! - [`PgQueue`]: `job_queue` table with `FOR UPDATE SKIP LOCKED` receives.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

/// Identifier assigned to a message at enqueue time.
pub type MessageId = uuid::Uuid;

/// Default visibility window for a received message.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue service could not be reached.
    #[error("Queue transport error: {0}")]
    Transport(String),

    /// The receipt handle no longer refers to the current delivery: the
    /// visibility window ran out and the message was redelivered, acked, or
    /// released.
    #[error("Receipt for message {0} is no longer valid")]
    ReceiptExpired(MessageId),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Queue-level redrive and visibility settings.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    /// Deliveries without an ack before the message is dead-lettered.
    pub max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Handle identifying this particular delivery.
    pub receipt: uuid::Uuid,
    pub body: String,
    /// How many times the message has been delivered, including this one.
    pub receive_count: u32,
}

/// Approximate queue depth, exported for replica autoscaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub visible: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, body: &str) -> Result<MessageId, QueueError>;

    /// Wait up to `max_wait` for a visible message. `Ok(None)` on timeout.
    async fn receive(&self, max_wait: Duration) -> Result<Option<Message>, QueueError>;

    /// Push the message's visibility deadline one window into the future.
    async fn heartbeat(&self, message: &Message) -> Result<(), QueueError>;

    /// Permanently remove the message.
    async fn ack(&self, message: &Message) -> Result<(), QueueError>;

    /// Make the message visible to consumers immediately.
    async fn release(&self, message: &Message) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;
}
