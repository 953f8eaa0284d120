//! Redis list as a reliable task queue.
//!
//! # Layout
//!
//! - **Pending list**: `{queue}` (default `cola_tickets`), producers `RPUSH`
//!   the decimal ticket id.
//! - **In-flight list**: `{queue}:processing:{consumer}`, one per consumer.
//!   `BLMOVE` takes the head of the pending list and appends it here in one
//!   atomic step, so a consumer that dies holding a message leaves it in its
//!   own in-flight list.
//!
//! Acknowledging removes the payload from the in-flight list (`LREM`).
//! Releasing removes it and pushes it back to the pending tail in one
//! `MULTI`. Recovering moves everything in flight back to the pending head.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use helpdesk_core::queue::{Delivery, QueueFuture, TaskQueue, decode_payload, encode_payload};
use helpdesk_core::{QueueError, TicketId};

/// Default pending list name.
pub const DEFAULT_QUEUE_NAME: &str = "cola_tickets";

/// One consumer's handle on a Redis-backed task queue.
///
/// Each handle owns its connection: a blocked `BLMOVE` only stalls the
/// consumer that issued it.
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    pending_key: String,
    processing_key: String,
    poll_timeout: Duration,
}

impl RedisTaskQueue {
    /// Connect a handle for `consumer` on queue `queue_name`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `queue_name` - Pending list key
    /// * `consumer` - Names this handle's in-flight list; reuse it across
    ///   restarts so [`TaskQueue::recover`] finds the previous run's messages
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the connection fails.
    pub async fn new(redis_url: &str, queue_name: &str, consumer: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url).map_err(|e| {
            QueueError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            QueueError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn,
            pending_key: queue_name.to_string(),
            processing_key: Self::processing_key(queue_name, consumer),
            poll_timeout: Duration::from_secs(5),
        })
    }

    /// Set how long one `BLMOVE` may block before the call loops (default 5s).
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Key of a consumer's in-flight list.
    #[must_use]
    pub fn processing_key(queue_name: &str, consumer: &str) -> String {
        format!("{queue_name}:processing:{consumer}")
    }

    /// Pending list key.
    #[must_use]
    pub fn pending_key(&self) -> &str {
        &self.pending_key
    }

    /// Number of messages this handle holds unacknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if Redis is unavailable.
    pub async fn in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        conn.llen(&self.processing_key)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
    }

    /// Remove one copy of `payload` from the in-flight list.
    async fn remove_in_flight(&self, payload: &str) -> Result<usize, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.lrem(&self.processing_key, 1, payload).await
    }

    async fn dequeue_blocking(&self) -> Result<Delivery, QueueError> {
        let mut conn = self.conn.clone();

        loop {
            let payload: Option<String> = redis::cmd("BLMOVE")
                .arg(&self.pending_key)
                .arg(&self.processing_key)
                .arg("LEFT")
                .arg("RIGHT")
                .arg(self.poll_timeout.as_secs_f64())
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;

            let Some(payload) = payload else {
                continue;
            };

            return match decode_payload(&payload) {
                Ok(ticket_id) => Ok(Delivery::new(ticket_id, payload)),
                Err(e) => {
                    if let Err(lrem) = self.remove_in_flight(&payload).await {
                        tracing::warn!(%payload, error = %lrem, "Failed to drop malformed payload");
                    }
                    Err(e)
                }
            };
        }
    }
}

impl std::fmt::Debug for RedisTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskQueue")
            .field("pending_key", &self.pending_key)
            .field("processing_key", &self.processing_key)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskQueue for RedisTaskQueue {
    fn enqueue(&self, ticket_id: TicketId) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let length: usize = conn
                .rpush(&self.pending_key, encode_payload(ticket_id))
                .await
                .map_err(|e| QueueError::EnqueueFailed {
                    ticket_id,
                    reason: e.to_string(),
                })?;

            tracing::debug!(%ticket_id, queue = %self.pending_key, length, "Pushed ticket id");
            Ok(())
        })
    }

    fn dequeue(&self) -> QueueFuture<'_, Delivery> {
        Box::pin(self.dequeue_blocking())
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let removed = self
                .remove_in_flight(delivery.receipt())
                .await
                .map_err(|e| QueueError::AcknowledgeFailed {
                    ticket_id: delivery.ticket_id(),
                    reason: e.to_string(),
                })?;

            if removed == 0 {
                tracing::warn!(ticket_id = %delivery.ticket_id(), "Acknowledged message was not in flight");
            }
            Ok(())
        })
    }

    fn release<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: () = redis::pipe()
                .atomic()
                .lrem(&self.processing_key, 1, delivery.receipt())
                .ignore()
                .rpush(&self.pending_key, delivery.receipt())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::AcknowledgeFailed {
                    ticket_id: delivery.ticket_id(),
                    reason: e.to_string(),
                })?;
            Ok(())
        })
    }

    fn recover(&self) -> QueueFuture<'_, usize> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let mut recovered = 0;

            // Newest in-flight first onto the head, so the oldest ends up first.
            loop {
                let moved: Option<String> = redis::cmd("LMOVE")
                    .arg(&self.processing_key)
                    .arg(&self.pending_key)
                    .arg("RIGHT")
                    .arg("LEFT")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

                if moved.is_none() {
                    break;
                }
                recovered += 1;
            }

            if recovered > 0 {
                tracing::info!(queue = %self.pending_key, in_flight = %self.processing_key, recovered, "Recovered in-flight messages");
            }
            Ok(recovered)
        })
    }

    fn pending(&self) -> QueueFuture<'_, usize> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            conn.llen(&self.pending_key)
                .await
                .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
        })
    }
}
