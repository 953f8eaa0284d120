//! Errors raised by ticket stores and task queues.

use thiserror::Error;

use crate::types::{TicketId, UserId};

/// Errors that can occur during ticket store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Ticket does not exist.
    #[error("Ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// User does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored row could not be mapped onto a domain type.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// The step run inside the transaction before commit failed; nothing was written.
    #[error("Pre-commit step failed: {0}")]
    PreCommit(#[from] QueueError),
}

/// Errors that can occur during task queue operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Failed to connect to the queue backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to append a message.
    #[error("Enqueue failed for ticket {ticket_id}: {reason}")]
    EnqueueFailed {
        /// The ticket whose message was not appended
        ticket_id: TicketId,
        /// The reason for failure
        reason: String,
    },

    /// Failed to take a message off the queue.
    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    /// Failed to acknowledge or release an in-flight message.
    #[error("Acknowledge failed for ticket {ticket_id}: {reason}")]
    AcknowledgeFailed {
        /// The ticket whose message is still in flight
        ticket_id: TicketId,
        /// The reason for failure
        reason: String,
    },

    /// The payload is not a ticket id.
    #[error("Malformed queue payload: {0:?}")]
    MalformedPayload(String),
}

impl QueueError {
    /// Whether retrying the same call may succeed.
    ///
    /// Malformed payloads never get better on retry; everything else is an
    /// availability problem.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::MalformedPayload(_))
    }
}
