//! [`Queue`] backed by the `job_queue` table.
//!
//! Receives claim the oldest visible row with `FOR UPDATE SKIP LOCKED`, so
//! any number of worker processes can poll the same table without handing
//! one message to two consumers inside a visibility window. Long-polling is
//! a bounded re-poll loop.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{Message, MessageId, Queue, QueueConfig, QueueDepth, QueueError};

/// Interval between polls while long-polling an empty queue.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    receipt: Uuid,
    body: String,
    receive_count: i32,
}

pub struct PgQueue {
    pool: PgPool,
    config: QueueConfig,
    poll_interval: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn visibility_secs(&self) -> f64 {
        self.config.visibility_timeout.as_secs_f64()
    }

    /// Dead-letter visible messages that exhausted their deliveries.
    async fn redrive(&self) -> Result<(), QueueError> {
        let moved = sqlx::query(
            "UPDATE job_queue SET dead_lettered_at = NOW(), receipt = NULL \
             WHERE dead_lettered_at IS NULL \
               AND visible_at <= NOW() \
               AND receive_count >= $1",
        )
        .bind(self.config.max_receive_count as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if moved > 0 {
            tracing::warn!(moved, "Messages moved to dead-letter queue");
        }
        Ok(())
    }

    async fn try_receive(&self) -> Result<Option<Message>, QueueError> {
        self.redrive().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            "UPDATE job_queue \
             SET receipt = $1, receive_count = receive_count + 1, \
                 visible_at = NOW() + make_interval(secs => $2) \
             WHERE id = ( \
                 SELECT id FROM job_queue \
                 WHERE dead_lettered_at IS NULL AND visible_at <= NOW() \
                 ORDER BY enqueued_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, receipt, body, receive_count",
        )
        .bind(Uuid::new_v4())
        .bind(self.visibility_secs())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Message {
            id: r.id,
            receipt: r.receipt,
            body: r.body,
            receive_count: r.receive_count.max(0) as u32,
        }))
    }

    fn expect_current(rows_affected: u64, message: &Message) -> Result<(), QueueError> {
        if rows_affected == 0 {
            return Err(QueueError::ReceiptExpired(message.id));
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn enqueue(&self, body: &str) -> Result<MessageId, QueueError> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO job_queue (id, body) VALUES ($1, $2)")
            .bind(id)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<Message>, QueueError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(message) = self.try_receive().await? {
                return Ok(Some(message));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }
    }

    async fn heartbeat(&self, message: &Message) -> Result<(), QueueError> {
        let affected = sqlx::query(
            "UPDATE job_queue SET visible_at = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND receipt = $2 AND dead_lettered_at IS NULL",
        )
        .bind(message.id)
        .bind(message.receipt)
        .bind(self.visibility_secs())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Self::expect_current(affected, message)
    }

    async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        let affected = sqlx::query("DELETE FROM job_queue WHERE id = $1 AND receipt = $2")
            .bind(message.id)
            .bind(message.receipt)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Self::expect_current(affected, message)
    }

    async fn release(&self, message: &Message) -> Result<(), QueueError> {
        let affected = sqlx::query(
            "UPDATE job_queue SET visible_at = NOW(), receipt = NULL \
             WHERE id = $1 AND receipt = $2 AND dead_lettered_at IS NULL",
        )
        .bind(message.id)
        .bind(message.receipt)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Self::expect_current(affected, message)
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let (visible, in_flight, dead_lettered): (i64, i64, i64) = sqlx::query_as(
            "SELECT \
                 COUNT(*) FILTER (WHERE dead_lettered_at IS NULL AND visible_at <= NOW()), \
                 COUNT(*) FILTER (WHERE dead_lettered_at IS NULL AND visible_at > NOW()), \
                 COUNT(*) FILTER (WHERE dead_lettered_at IS NOT NULL) \
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueDepth {
            visible: visible.max(0) as u64,
            in_flight: in_flight.max(0) as u64,
            dead_lettered: dead_lettered.max(0) as u64,
        })
    }
}
