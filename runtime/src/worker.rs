//! Completion worker.
//!
//! Turns a queued ticket id into a committed `en_proceso → cerrado`
//! transition, safely under concurrent workers, redelivery and restarts.
//!
//! # Pattern: Dequeue-Validate-Work-Commit-Ack
//!
//! ```text
//! recover()                        // in-flight items from a previous run
//! loop {
//!     select! { shutdown => break, dequeue => delivery }
//!     load ticket (settled)        // missing → ack, discard
//!     state == en_proceso?         // cerrado / abierto → ack, discard
//!     perform work (with timeout)  // failure → release
//!     CAS en_proceso → cerrado     // + audit entry, one transaction
//!                                  // lost race → ack, discard
//!                                  // commit failure → release
//!     ack
//! }
//! ```
//!
//! The shutdown signal is only observed between messages, so a worker always
//! finishes (and commits) the message it holds before exiting. Consecutive
//! failures slow the loop down with exponential backoff; any success resets it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use helpdesk_core::queue::{Delivery, TaskQueue};
use helpdesk_core::store::{TicketStore, TransitionOutcome};
use helpdesk_core::{AuditEntry, InvalidTransition, QueueError, StoreError, TicketState};

use crate::metrics::WorkerMetrics;
use crate::retry::RetryPolicy;
use crate::work::{CompletionWork, WorkError};

/// Why a message was dropped without closing its ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// The ticket does not exist.
    NotFound,
    /// The ticket is already `cerrado` (redelivery, or closed by an operator).
    AlreadyClosed,
    /// The ticket is still `abierto`: a stray message whose state change never committed.
    NotStarted,
    /// Another writer moved the ticket between validation and commit.
    LostRace,
}

impl DiscardReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyClosed => "already_closed",
            Self::NotStarted => "not_started",
            Self::LostRace => "lost_race",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of handling one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The ticket was closed and the message acknowledged.
    Completed,
    /// Nothing was written; the message was acknowledged.
    Discarded(DiscardReason),
    /// The attempt failed; the message went back to the queue.
    Released,
}

impl WorkerOutcome {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Discarded(reason) => reason.as_str(),
            Self::Released => "released",
        }
    }
}

/// Errors that make an attempt fail (and its message be released).
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Loading or writing the ticket failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The completion work failed or timed out.
    #[error(transparent)]
    Work(#[from] WorkError),

    /// The closing transition was rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Consumes ticket ids from a task queue and closes the tickets.
///
/// Each worker owns its queue handle (and therefore its in-flight list);
/// workers share nothing but the ticket store.
pub struct CompletionWorker {
    /// Consumer name (for logging)
    name: String,

    /// This worker's queue handle
    queue: Arc<dyn TaskQueue>,

    /// Authoritative ticket state
    store: Arc<dyn TicketStore>,

    /// Step performed before closing
    work: Arc<dyn CompletionWork>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Upper bound on one work attempt (default: 60 seconds)
    work_timeout: Duration,

    /// Delay schedule after consecutive failures
    backoff: RetryPolicy,
}

impl CompletionWorker {
    /// Create a worker with a 60 second work timeout and a backoff starting
    /// at 500ms, capped at 30 seconds.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn TicketStore>,
        work: Arc<dyn CompletionWork>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            store,
            work,
            shutdown,
            work_timeout: Duration::from_secs(60),
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(true)
                .build(),
        }
    }

    /// Set the work timeout.
    #[must_use]
    pub const fn with_work_timeout(mut self, timeout: Duration) -> Self {
        self.work_timeout = timeout;
        self
    }

    /// Set the failure backoff schedule. Only the delays are used.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker loop as a background task.
    ///
    /// The task runs until the shutdown signal fires (or its sender is dropped).
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the worker loop on the current task.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, "Completion worker started");

        match self.queue.recover().await {
            Ok(0) => {}
            Ok(recovered) => {
                warn!(consumer = %self.name, recovered, "Returned in-flight messages from a previous run");
            }
            Err(e) => {
                error!(consumer = %self.name, error = %e, "Failed to recover in-flight messages");
            }
        }

        let mut failures = 0usize;
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Completion worker received shutdown signal");
                    break;
                }
                next = self.queue.dequeue() => next,
            };

            let failed = match next {
                Ok(delivery) => self.process_one(&delivery).await == WorkerOutcome::Released,
                Err(QueueError::MalformedPayload(payload)) => {
                    warn!(consumer = %self.name, %payload, "Dropped malformed queue payload");
                    false
                }
                Err(e) => {
                    WorkerMetrics::record_dequeue_error();
                    error!(consumer = %self.name, error = %e, "Failed to dequeue");
                    true
                }
            };

            if failed {
                failures += 1;
                if self.back_off(failures).await {
                    break;
                }
            } else {
                failures = 0;
            }
        }

        info!(consumer = %self.name, "Completion worker stopped");
    }

    /// Handle one delivered message end to end, including its ack or release.
    ///
    /// Never fails: every error becomes [`WorkerOutcome::Released`].
    pub async fn process_one(&self, delivery: &Delivery) -> WorkerOutcome {
        let ticket_id = delivery.ticket_id();

        let outcome = match self.attempt(delivery).await {
            Ok(Attempt::Closed { work_duration }) => {
                WorkerMetrics::record_completed(work_duration);
                info!(consumer = %self.name, %ticket_id, "Ticket closed");
                WorkerOutcome::Completed
            }
            Ok(Attempt::Discard(reason)) => {
                WorkerMetrics::record_discarded(reason.as_str());
                match reason {
                    DiscardReason::NotFound => {
                        warn!(consumer = %self.name, %ticket_id, "Ticket not found, discarding message");
                    }
                    _ => {
                        debug!(consumer = %self.name, %ticket_id, %reason, "Discarding message");
                    }
                }
                WorkerOutcome::Discarded(reason)
            }
            Err(e) => {
                WorkerMetrics::record_released();
                error!(consumer = %self.name, %ticket_id, error = %e, "Attempt failed, releasing message");
                WorkerOutcome::Released
            }
        };

        self.settle(delivery, outcome).await;
        outcome
    }

    async fn attempt(&self, delivery: &Delivery) -> Result<Attempt, ProcessError> {
        let ticket_id = delivery.ticket_id();

        // The id can arrive before the transition that enqueued it commits
        let Some(ticket) = self.store.find_ticket_settled(ticket_id).await? else {
            return Ok(Attempt::Discard(DiscardReason::NotFound));
        };

        match ticket.state {
            TicketState::InProgress => {}
            TicketState::Closed => return Ok(Attempt::Discard(DiscardReason::AlreadyClosed)),
            TicketState::Open => return Ok(Attempt::Discard(DiscardReason::NotStarted)),
        }

        let started = Instant::now();
        match tokio::time::timeout(self.work_timeout, self.work.perform(&ticket)).await {
            Ok(result) => result?,
            Err(_) => return Err(WorkError::TimedOut(self.work_timeout).into()),
        }
        let work_duration = started.elapsed();

        let transition = ticket.state.transition_to(TicketState::Closed)?;
        let entry = AuditEntry::operator(transition.audit_message());

        match self.store.transition(ticket_id, transition, entry, None).await {
            Ok(TransitionOutcome::Applied { .. }) => Ok(Attempt::Closed { work_duration }),
            Ok(TransitionOutcome::Skipped { current }) => {
                debug!(consumer = %self.name, %ticket_id, %current, "Ticket changed during work");
                Ok(Attempt::Discard(DiscardReason::LostRace))
            }
            Err(StoreError::TicketNotFound(_)) => Ok(Attempt::Discard(DiscardReason::NotFound)),
            Err(e) => Err(e.into()),
        }
    }

    /// Acknowledge a final outcome or hand the message back.
    ///
    /// A failed ack leaves the message in flight; it is recovered on restart
    /// and then discarded, since the ticket is already final.
    async fn settle(&self, delivery: &Delivery, outcome: WorkerOutcome) {
        let result = match outcome {
            WorkerOutcome::Completed | WorkerOutcome::Discarded(_) => self.queue.ack(delivery).await,
            WorkerOutcome::Released => self.queue.release(delivery).await,
        };

        if let Err(e) = result {
            error!(
                consumer = %self.name,
                ticket_id = %delivery.ticket_id(),
                outcome = outcome.as_str(),
                error = %e,
                "Failed to settle message"
            );
        }
    }

    /// Sleep before the next iteration. Returns `true` if shutdown arrived meanwhile.
    async fn back_off(&mut self, failures: usize) -> bool {
        let delay = self.backoff.backoff_delay(failures.saturating_sub(1));
        warn!(consumer = %self.name, failures, delay_ms = delay.as_millis(), "Backing off");

        tokio::select! {
            _ = self.shutdown.recv() => {
                info!(consumer = %self.name, "Completion worker received shutdown signal");
                true
            }
            () = tokio::time::sleep(delay) => false,
        }
    }
}

impl fmt::Debug for CompletionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionWorker")
            .field("name", &self.name)
            .field("work_timeout", &self.work_timeout)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    Closed { work_duration: Duration },
    Discard(DiscardReason),
}
