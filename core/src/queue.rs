//! Task queue abstraction.
//!
//! A durable, ordered, at-least-once FIFO of ticket ids awaiting completion.
//!
//! # Delivery Semantics
//!
//! - `enqueue` appends to the tail and returns once the append is durable.
//! - `dequeue` blocks until an item exists and hands it to exactly one
//!   consumer. The item is not gone yet: it sits in that consumer's in-flight
//!   set until the consumer calls [`TaskQueue::ack`] (done) or
//!   [`TaskQueue::release`] (give it back for redelivery).
//! - A consumer that dies while holding an item leaves it in flight;
//!   [`TaskQueue::recover`] on restart pushes it back to the pending list.
//!
//! Consumers must therefore be idempotent: the same ticket id can arrive more
//! than once, and redelivered items lose their original position.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::QueueError;
use crate::types::TicketId;

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Wire encoding of a ticket id: its decimal string.
#[must_use]
pub fn encode_payload(ticket_id: TicketId) -> String {
    ticket_id.to_string()
}

/// Decode a wire payload.
///
/// # Errors
///
/// Returns [`QueueError::MalformedPayload`] if the payload is not an integer.
pub fn decode_payload(payload: &str) -> Result<TicketId, QueueError> {
    payload
        .parse()
        .map_err(|_| QueueError::MalformedPayload(payload.to_string()))
}

/// A message handed to one consumer, pending acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    ticket_id: TicketId,
    receipt: String,
}

impl Delivery {
    /// Pair a ticket id with the backend's receipt for it.
    #[must_use]
    pub fn new(ticket_id: TicketId, receipt: impl Into<String>) -> Self {
        Self {
            ticket_id,
            receipt: receipt.into(),
        }
    }

    /// The ticket this message is about.
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// Opaque backend handle used to acknowledge or release the message.
    #[must_use]
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket {}", self.ticket_id)
    }
}

/// Durable at-least-once FIFO of ticket ids.
///
/// Each value represents one consumer's handle: in-flight tracking is per
/// handle, so every worker owns its own instance.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be held as
/// `Arc<dyn TaskQueue>`.
pub trait TaskQueue: Send + Sync {
    /// Append a ticket id to the tail.
    ///
    /// # Errors
    ///
    /// `EnqueueFailed` or `ConnectionFailed` if the append was not made durable.
    fn enqueue(&self, ticket_id: TicketId) -> QueueFuture<'_, ()>;

    /// Wait for the next item and take it into this consumer's in-flight set.
    ///
    /// # Errors
    ///
    /// `DequeueFailed` or `ConnectionFailed` if the backend is unavailable.
    fn dequeue(&self) -> QueueFuture<'_, Delivery>;

    /// Remove an in-flight item for good.
    ///
    /// # Errors
    ///
    /// `AcknowledgeFailed` if the removal could not be recorded.
    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()>;

    /// Return an in-flight item to the tail of the pending list.
    ///
    /// # Errors
    ///
    /// `AcknowledgeFailed` if the item could not be moved.
    fn release<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()>;

    /// Move every item left in flight by a previous run of this consumer back
    /// to the pending list. Returns how many were moved.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the backend is unavailable.
    fn recover(&self) -> QueueFuture<'_, usize>;

    /// Number of items waiting to be dequeued.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the backend is unavailable.
    fn pending(&self) -> QueueFuture<'_, usize>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn payload_is_the_decimal_id() {
        assert_eq!(encode_payload(TicketId::new(42)), "42");
        assert_eq!(decode_payload("42").unwrap(), TicketId::new(42));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let err = decode_payload("ticket-42").unwrap_err();
        assert!(matches!(err, QueueError::MalformedPayload(ref p) if p == "ticket-42"));
        assert!(!err.is_transient());
    }
}
