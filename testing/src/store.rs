//! In-memory ticket store.
//!
//! Applies transitions with the same compare-and-set semantics and the same
//! visibility as the Postgres store. While a transition awaits its pre-commit
//! step the ticket is row-locked: plain reads still see the previous state,
//! while settled reads and other writers on that ticket wait for the outcome.

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, Notify};

use helpdesk_core::environment::{Clock, SystemClock};
use helpdesk_core::state::Transition;
use helpdesk_core::store::{PreCommit, StoreFuture, TicketFilter, TicketStore, TransitionOutcome};
use helpdesk_core::{
    AuditEntry, Interaction, InteractionId, StoreError, Ticket, TicketDraft, TicketId, TicketState,
};

#[derive(Debug, Default)]
struct Tables {
    tickets: BTreeMap<TicketId, Ticket>,
    interactions: Vec<Interaction>,
    last_ticket_id: i64,
    last_interaction_id: i64,
    /// Tickets whose transition is awaiting its pre-commit step
    row_locks: BTreeSet<TicketId>,
}

impl Tables {
    fn append(&mut self, ticket_id: TicketId, entry: AuditEntry, at: DateTime<Utc>) -> Interaction {
        self.last_interaction_id += 1;
        let interaction = Interaction {
            id: InteractionId::new(self.last_interaction_id),
            ticket_id,
            author: entry.author,
            message: entry.message,
            created_at: at,
        };
        self.interactions.push(interaction.clone());
        interaction
    }

    fn apply(
        &mut self,
        id: TicketId,
        transition: Transition,
        entry: AuditEntry,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let Some(stored) = self.tickets.get_mut(&id) else {
            return Err(StoreError::TicketNotFound(id));
        };
        stored.state = transition.to();
        stored.updated_at = at;
        let ticket = stored.clone();
        let interaction = self.append(id, entry, at);

        Ok(TransitionOutcome::Applied { ticket, interaction })
    }
}

/// In-memory [`TicketStore`] for fast, deterministic tests.
///
/// Cloning shares the underlying tables.
///
/// # Example
///
/// ```
/// use helpdesk_testing::InMemoryTicketStore;
/// use helpdesk_core::store::TicketStore;
/// use helpdesk_core::{AuditEntry, Priority, TicketDraft, TicketState, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryTicketStore::new();
/// let ticket = store
///     .create_ticket(
///         TicketDraft {
///             owner_id: UserId::new(1),
///             subject: "VPN down".to_string(),
///             description: String::new(),
///             priority: Priority::High,
///         },
///         AuditEntry::operator("Ticket creado por Ana para Luis"),
///     )
///     .await?;
/// assert_eq!(ticket.state, TicketState::Open);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryTicketStore {
    tables: Arc<Mutex<Tables>>,
    unlocked: Arc<Notify>,
    clock: Arc<dyn Clock>,
    failing_transitions: Arc<AtomicUsize>,
}

impl InMemoryTicketStore {
    /// Create an empty store stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            unlocked: Arc::new(Notify::new()),
            clock: Arc::new(SystemClock),
            failing_transitions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use `clock` for creation and modification times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Insert a ticket exactly as given (state and timestamps included).
    ///
    /// Later inserts get ids above the highest seeded one.
    pub async fn seed_ticket(&self, ticket: Ticket) {
        let mut tables = self.tables.lock().await;
        tables.last_ticket_id = tables.last_ticket_id.max(ticket.id.get());
        tables.tickets.insert(ticket.id, ticket);
    }

    /// Make the next `count` transitions fail at commit time.
    ///
    /// The compare-and-set check and the pre-commit step still run, so this
    /// models a commit that fails after the enqueue succeeded.
    pub fn fail_next_transitions(&self, count: usize) {
        self.failing_transitions.store(count, Ordering::SeqCst);
    }

    /// Number of stored tickets.
    pub async fn ticket_count(&self) -> usize {
        self.tables.lock().await.tickets.len()
    }

    /// Number of audit rows across all tickets.
    pub async fn interaction_count(&self) -> usize {
        self.tables.lock().await.interactions.len()
    }

    /// Lock the tables once `id` has no transition in flight.
    async fn lock_row(&self, id: TicketId) -> MutexGuard<'_, Tables> {
        loop {
            // Registered before the check so a concurrent unlock is not missed
            let unlocked = self.unlocked.notified();
            let tables = self.tables.lock().await;
            if !tables.row_locks.contains(&id) {
                return tables;
            }
            drop(tables);
            unlocked.await;
        }
    }

    fn take_failure(&self) -> bool {
        self.failing_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTicketStore").finish_non_exhaustive()
    }
}

impl TicketStore for InMemoryTicketStore {
    fn create_ticket(&self, draft: TicketDraft, entry: AuditEntry) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let mut guard = self.tables.lock().await;
            let tables = &mut *guard;
            let now = self.clock.now();

            tables.last_ticket_id += 1;
            let ticket = Ticket {
                id: TicketId::new(tables.last_ticket_id),
                owner_id: draft.owner_id,
                subject: draft.subject,
                description: draft.description,
                priority: draft.priority,
                state: TicketState::Open,
                created_at: now,
                updated_at: now,
            };
            tables.tickets.insert(ticket.id, ticket.clone());
            tables.append(ticket.id, entry, now);
            Ok(ticket)
        })
    }

    fn find_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move { Ok(self.tables.lock().await.tickets.get(&id).cloned()) })
    }

    fn find_ticket_settled(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move { Ok(self.lock_row(id).await.tickets.get(&id).cloned()) })
    }

    fn transition<'a>(
        &'a self,
        id: TicketId,
        transition: Transition,
        entry: AuditEntry,
        pre_commit: Option<PreCommit<'a>>,
    ) -> StoreFuture<'a, TransitionOutcome> {
        Box::pin(async move {
            let mut tables = self.lock_row(id).await;

            let current = tables
                .tickets
                .get(&id)
                .map(|t| t.state)
                .ok_or(StoreError::TicketNotFound(id))?;
            if current != transition.from() {
                return Ok(TransitionOutcome::Skipped { current });
            }

            if let Some(step) = pre_commit {
                tables.row_locks.insert(id);
                drop(tables);

                let result = step.await;

                tables = self.tables.lock().await;
                tables.row_locks.remove(&id);
                self.unlocked.notify_waiters();
                result?;
            }

            if self.take_failure() {
                return Err(StoreError::DatabaseError("injected commit failure".to_string()));
            }

            let now = self.clock.now();
            tables.apply(id, transition, entry, now)
        })
    }

    fn list_history(&self, id: TicketId) -> StoreFuture<'_, Vec<Interaction>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut history: Vec<Interaction> = tables
                .interactions
                .iter()
                .filter(|i| i.ticket_id == id)
                .cloned()
                .collect();
            history.sort_by_key(|i| (i.created_at, i.id));
            Ok(history)
        })
    }

    fn list_tickets(&self, filter: TicketFilter) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut tickets: Vec<Ticket> = tables
                .tickets
                .values()
                .filter(|t| match filter {
                    TicketFilter::All => true,
                    TicketFilter::OwnedBy(owner) => t.owner_id == owner,
                })
                .cloned()
                .collect();
            tickets.sort_by_key(|t| std::cmp::Reverse((t.created_at, t.id)));
            Ok(tickets)
        })
    }

    fn find_stalled(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut stalled: Vec<Ticket> = tables
                .tickets
                .values()
                .filter(|t| t.state == TicketState::InProgress && t.updated_at < older_than)
                .cloned()
                .collect();
            stalled.sort_by_key(|t| (t.updated_at, t.id));
            Ok(stalled)
        })
    }
}
