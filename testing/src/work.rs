//! Completion work that records what it was asked to do.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use helpdesk_core::{Ticket, TicketId};
use helpdesk_runtime::work::{CompletionWork, WorkError};

/// [`CompletionWork`] that records every call, with optional delay and
/// scripted failures.
///
/// Cloning shares the record.
#[derive(Clone, Debug, Default)]
pub struct RecordingWork {
    performed: Arc<Mutex<Vec<TicketId>>>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
}

impl RecordingWork {
    /// Work that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` on every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `count` calls.
    #[must_use]
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Tickets passed to `perform`, in call order (failed calls included).
    #[must_use]
    pub fn performed(&self) -> Vec<TicketId> {
        self.performed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionWork for RecordingWork {
    async fn perform(&self, ticket: &Ticket) -> Result<(), WorkError> {
        self.performed.lock().unwrap().push(ticket.id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(WorkError::Failed(format!("scripted failure for ticket {}", ticket.id)));
        }
        Ok(())
    }
}
