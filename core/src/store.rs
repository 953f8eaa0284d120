//! Ticket store abstraction.
//!
//! The ticket store is the durable record of tickets and their audit trail. It
//! owns the authoritative lifecycle value: every decision about whether a
//! ticket may change state is made against it, never against a cache.
//!
//! # Atomicity
//!
//! [`TicketStore::transition`] is the only write that changes a ticket's state.
//! Implementations must apply it as one unit:
//!
//! ```text
//! BEGIN
//!   UPDATE tickets SET state = :to, updated_at = now()
//!    WHERE id = :id AND state = :from          -- compare-and-set
//!   if no row updated → ROLLBACK, Skipped
//!   INSERT INTO interactions (...)             -- exactly one audit row
//!   await pre_commit                           -- e.g. enqueue
//!   if pre_commit failed → ROLLBACK, Err
//! COMMIT, Applied
//! ```
//!
//! Two writers racing on the same ticket therefore produce a single state
//! write and a single audit row.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `helpdesk-postgres`): production
//! - `InMemoryTicketStore` (in `helpdesk-testing`): fast, deterministic tests

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

use crate::error::{QueueError, StoreError};
use crate::state::{TicketState, Transition};
use crate::types::{AuditEntry, Interaction, Ticket, TicketDraft, TicketId, UserId};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Step awaited inside a transition's transaction, after the write and before commit.
///
/// The future is lazy: building it does nothing, the store decides when (and
/// whether) it runs.
pub type PreCommit<'a> = Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>;

/// Result of a compare-and-set transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The ticket was in the expected state; it was updated and audited.
    Applied {
        /// Ticket after the write
        ticket: Ticket,
        /// The audit row written with it
        interaction: Interaction,
    },
    /// The ticket was no longer in the expected state; nothing was written.
    Skipped {
        /// State found at write time
        current: TicketState,
    },
}

impl TransitionOutcome {
    /// Whether the write happened.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Which tickets to list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketFilter {
    /// Every ticket (operator view)
    All,
    /// Tickets owned by one client
    OwnedBy(UserId),
}

/// Durable ticket and audit storage.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so workers and services can share an `Arc<dyn TicketStore>`.
pub trait TicketStore: Send + Sync {
    /// Insert a ticket in [`TicketState::Open`] together with its creation entry.
    ///
    /// # Errors
    ///
    /// - `UserNotFound`: the owner does not exist (where enforced)
    /// - `DatabaseError`: the insert failed
    fn create_ticket(&self, draft: TicketDraft, entry: AuditEntry) -> StoreFuture<'_, Ticket>;

    /// Load a ticket by id. A missing ticket is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn find_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Load a ticket by id once no transition on it is in flight.
    ///
    /// Unlike [`find_ticket`](Self::find_ticket), this waits for a concurrent
    /// [`transition`](Self::transition) on the same ticket to commit or roll
    /// back and returns the outcome. Consumers must validate against this
    /// read: the pre-commit enqueue makes the id visible before the state
    /// change is.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn find_ticket_settled(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Apply a validated transition as a compare-and-set, appending `entry`.
    ///
    /// See the [module documentation](self) for the required atomicity.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound`: no such ticket
    /// - `PreCommit`: `pre_commit` failed and the write was rolled back
    /// - `DatabaseError`: the transaction failed; nothing was written
    fn transition<'a>(
        &'a self,
        id: TicketId,
        transition: Transition,
        entry: AuditEntry,
        pre_commit: Option<PreCommit<'a>>,
    ) -> StoreFuture<'a, TransitionOutcome>;

    /// Audit trail of a ticket, ascending by creation time then id.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn list_history(&self, id: TicketId) -> StoreFuture<'_, Vec<Interaction>>;

    /// List tickets, newest first.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn list_tickets(&self, filter: TicketFilter) -> StoreFuture<'_, Vec<Ticket>>;

    /// Tickets in [`TicketState::InProgress`] not modified since `older_than`.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn find_stalled(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>>;
}
