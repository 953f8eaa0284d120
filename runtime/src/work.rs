//! The completion step performed on a ticket before it is closed.
//!
//! The worker treats the work as opaque: it calls [`CompletionWork::perform`]
//! once per attempt, bounds it with a timeout, and only closes the ticket if
//! the call returns `Ok`. A failed or timed-out attempt leaves the ticket
//! `en_proceso` and the message is handed back to the queue.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use helpdesk_core::Ticket;

/// Errors from a completion attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The work ran and reported a failure.
    #[error("Completion work failed: {0}")]
    Failed(String),

    /// The work did not finish in time.
    #[error("Completion work timed out after {0:?}")]
    TimedOut(Duration),
}

/// Work performed on an `en_proceso` ticket before it is closed.
///
/// Implementations may be called more than once for the same ticket (a
/// released message is redelivered), so they should be safe to repeat.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use helpdesk_core::Ticket;
/// use helpdesk_runtime::work::{CompletionWork, WorkError};
///
/// struct NotifyOwner;
///
/// #[async_trait]
/// impl CompletionWork for NotifyOwner {
///     async fn perform(&self, ticket: &Ticket) -> Result<(), WorkError> {
///         tracing::info!(ticket_id = %ticket.id, "Notifying owner");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionWork: Send + Sync + 'static {
    /// Perform the work for one ticket.
    ///
    /// # Errors
    ///
    /// Returns [`WorkError::Failed`] if the work could not be done.
    async fn perform(&self, ticket: &Ticket) -> Result<(), WorkError>;
}

/// Stand-in work that just waits.
///
/// Default delay is five seconds.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    /// Work that takes `delay` and always succeeds.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl CompletionWork for SimulatedWork {
    async fn perform(&self, ticket: &Ticket) -> Result<(), WorkError> {
        tracing::debug!(ticket_id = %ticket.id, delay_ms = self.delay.as_millis(), "Simulating work");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
