//! Ticket management operations.
//!
//! [`TicketService`] is what an HTTP layer would call. Every failure surfaces
//! synchronously as a [`ServiceError`]; nothing here retries silently except
//! the enqueue producer, within its policy.
//!
//! State decisions always read the [`TicketStore`]. The [`UserDirectory`] may
//! be a cache and is only used to look up the people involved.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use helpdesk_core::directory::UserDirectory;
use helpdesk_core::environment::Clock;
use helpdesk_core::store::{PreCommit, TicketFilter, TicketStore, TransitionOutcome};
use helpdesk_core::{
    AuditEntry, Interaction, InvalidTransition, Priority, QueueError, Role, StoreError, Ticket,
    TicketDraft, TicketId, TicketState, User, UserId,
};

use crate::producer::EnqueueProducer;

/// Errors returned by [`TicketService`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The ticket or user does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested state change breaks the lifecycle.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The acting user may not perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The ticket changed state concurrently; nothing was written.
    #[error("Ticket {ticket_id} is {current}, expected {expected}")]
    Conflict {
        /// Ticket that changed
        ticket_id: TicketId,
        /// State the change was validated against
        expected: TicketState,
        /// State found at write time
        current: TicketState,
    },

    /// The store failed.
    #[error(transparent)]
    Store(StoreError),

    /// The task queue failed; the state change was rolled back.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::TicketNotFound(id) => Self::NotFound(format!("ticket {id}")),
            StoreError::UserNotFound(id) => Self::NotFound(format!("user {id}")),
            StoreError::PreCommit(queue) => Self::Queue(queue),
            other => Self::Store(other),
        }
    }
}

/// Request to open a ticket on behalf of a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Operator creating the ticket
    pub operator_id: UserId,
    /// Client the ticket is for
    pub owner_id: UserId,
    /// Subject line
    pub subject: String,
    /// Description
    pub description: String,
    /// Priority
    pub priority: Priority,
}

/// Ticket management boundary.
#[derive(Clone)]
pub struct TicketService {
    store: Arc<dyn TicketStore>,
    users: Arc<dyn UserDirectory>,
    producer: EnqueueProducer,
    clock: Arc<dyn Clock>,
}

impl TicketService {
    /// Create a service.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        users: Arc<dyn UserDirectory>,
        producer: EnqueueProducer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            users,
            producer,
            clock,
        }
    }

    /// Open a ticket for a client, with its creation entry.
    ///
    /// Never enqueues.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty subject
    /// - `Forbidden`: the operator is not an operator
    /// - `NotFound`: the operator or the client does not exist
    /// - `Store`: the insert failed
    pub async fn create_ticket(&self, request: NewTicket) -> Result<TicketId, ServiceError> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(ServiceError::Validation("subject must not be empty".to_string()));
        }

        let operator = self.require_user(request.operator_id).await?;
        if operator.role != Role::Operator {
            return Err(ServiceError::Forbidden(format!(
                "user {} is not an operator",
                operator.id
            )));
        }
        let owner = self.require_user(request.owner_id).await?;

        let draft = TicketDraft {
            owner_id: owner.id,
            subject: subject.to_string(),
            description: request.description,
            priority: request.priority,
        };
        let entry = AuditEntry::operator(format!(
            "Ticket creado por {} para {}",
            operator.name, owner.name
        ));

        let ticket = self.store.create_ticket(draft, entry).await?;
        info!(ticket_id = %ticket.id, operator_id = %operator.id, owner_id = %owner.id, "Ticket created");
        Ok(ticket.id)
    }

    /// Move a ticket to `new_state`, recording the change.
    ///
    /// Entering `en_proceso` enqueues the ticket inside the same transaction:
    /// if the enqueue fails the ticket is left unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such ticket
    /// - `InvalidTransition`: not the next lifecycle state (checked before
    ///   touching the queue)
    /// - `Conflict`: the ticket changed concurrently
    /// - `Queue`: the enqueue failed after retries
    /// - `Store`: the transaction failed
    pub async fn set_ticket_state(
        &self,
        ticket_id: TicketId,
        new_state: TicketState,
    ) -> Result<Ticket, ServiceError> {
        let ticket = self.require_ticket(ticket_id).await?;
        let transition = ticket.state.transition_to(new_state)?;
        let entry = AuditEntry::operator(transition.audit_message());

        let pre_commit: Option<PreCommit<'_>> = if transition.requires_enqueue() {
            Some(Box::pin(self.producer.on_ticket_marked_in_progress(ticket_id)))
        } else {
            None
        };

        match self.store.transition(ticket_id, transition, entry, pre_commit).await {
            Ok(TransitionOutcome::Applied { ticket, .. }) => {
                info!(%ticket_id, from = %transition.from(), to = %transition.to(), "Ticket state changed");
                Ok(ticket)
            }
            Ok(TransitionOutcome::Skipped { current }) => {
                warn!(%ticket_id, expected = %transition.from(), %current, "Ticket changed concurrently");
                Err(ServiceError::Conflict {
                    ticket_id,
                    expected: transition.from(),
                    current,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Audit trail of a ticket, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the ticket does not exist, `Store` if the query fails.
    pub async fn list_history(&self, ticket_id: TicketId) -> Result<Vec<Interaction>, ServiceError> {
        self.require_ticket(ticket_id).await?;
        Ok(self.store.list_history(ticket_id).await?)
    }

    /// Load one ticket.
    ///
    /// # Errors
    ///
    /// `NotFound` if the ticket does not exist, `Store` if the query fails.
    pub async fn find_ticket(&self, ticket_id: TicketId) -> Result<Ticket, ServiceError> {
        self.require_ticket(ticket_id).await
    }

    /// Tickets visible to `viewer`: all of them for an operator, their own
    /// for a client. Newest first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the viewer does not exist, `Store` if the query fails.
    pub async fn list_tickets(&self, viewer: UserId) -> Result<Vec<Ticket>, ServiceError> {
        let user = self.require_user(viewer).await?;
        let filter = match user.role {
            Role::Operator => TicketFilter::All,
            Role::Client => TicketFilter::OwnedBy(user.id),
        };
        Ok(self.store.list_tickets(filter).await?)
    }

    /// Every registered user.
    ///
    /// # Errors
    ///
    /// `Store` if the lookup fails.
    pub async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.users.list_users().await?)
    }

    /// Load one user.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user does not exist, `Store` if the lookup fails.
    pub async fn find_user(&self, user_id: UserId) -> Result<User, ServiceError> {
        self.require_user(user_id).await
    }

    /// Re-enqueue every ticket stuck `en_proceso` for longer than `older_than`.
    ///
    /// Covers messages lost between dequeue and commit. Safe to run at any
    /// time: the worker ignores duplicates. Returns the re-enqueued ids.
    ///
    /// # Errors
    ///
    /// `Store` if the scan fails, `Queue` on the first enqueue that fails
    /// (tickets before it stay enqueued).
    pub async fn reconcile_stalled(&self, older_than: Duration) -> Result<Vec<TicketId>, ServiceError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| ServiceError::Validation(format!("reconcile age out of range: {e}")))?;
        let cutoff = self.clock.now() - age;

        let stalled = self.store.find_stalled(cutoff).await?;
        let mut requeued = Vec::with_capacity(stalled.len());
        for ticket in stalled {
            self.producer.on_ticket_marked_in_progress(ticket.id).await?;
            requeued.push(ticket.id);
        }

        if !requeued.is_empty() {
            warn!(count = requeued.len(), %cutoff, "Re-enqueued stalled tickets");
        }
        Ok(requeued)
    }

    async fn require_ticket(&self, ticket_id: TicketId) -> Result<Ticket, ServiceError> {
        self.store
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("ticket {ticket_id}")))
    }

    async fn require_user(&self, user_id: UserId) -> Result<User, ServiceError> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }
}

impl std::fmt::Debug for TicketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketService")
            .field("producer", &self.producer)
            .finish_non_exhaustive()
    }
}
