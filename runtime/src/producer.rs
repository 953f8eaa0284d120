//! Enqueue producer.
//!
//! Emits one queue message each time a ticket enters `en_proceso`. Transient
//! queue failures are retried with exponential backoff; once retries are
//! exhausted the error goes back to the caller, which rolls the state change
//! back. A failed enqueue is never swallowed.

use std::sync::Arc;

use helpdesk_core::queue::TaskQueue;
use helpdesk_core::{QueueError, TicketId};

use crate::metrics::ProducerMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};

/// Pushes ticket ids onto the task queue.
#[derive(Clone)]
pub struct EnqueueProducer {
    queue: Arc<dyn TaskQueue>,
    policy: RetryPolicy,
}

impl EnqueueProducer {
    /// Producer with the default retry policy (3 retries from 100ms).
    #[must_use]
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enqueue `ticket_id` after it was marked `en_proceso`.
    ///
    /// Called once per transition event. Never called on creation or on
    /// closure.
    ///
    /// # Errors
    ///
    /// Returns the last [`QueueError`] if every attempt failed, or the first
    /// one if it was not transient.
    pub async fn on_ticket_marked_in_progress(&self, ticket_id: TicketId) -> Result<(), QueueError> {
        let queue = &self.queue;
        let result = retry_with_predicate(
            self.policy.clone(),
            || queue.enqueue(ticket_id),
            QueueError::is_transient,
        )
        .await;

        match &result {
            Ok(()) => {
                ProducerMetrics::record_enqueued();
                tracing::info!(%ticket_id, "Ticket enqueued for completion");
            }
            Err(error) => {
                ProducerMetrics::record_failure();
                tracing::error!(%ticket_id, %error, "Failed to enqueue ticket");
            }
        }
        result
    }
}

impl std::fmt::Debug for EnqueueProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueProducer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
