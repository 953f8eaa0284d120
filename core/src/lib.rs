//! # Helpdesk Core
//!
//! Domain types and infrastructure traits for the helpdesk ticket pipeline.
//!
//! Support tickets are raised by clients and worked by operators. When an
//! operator moves a ticket into processing, its id is pushed onto a task queue;
//! completion workers pop ids, re-validate the ticket, perform the completion
//! work and close the ticket together with an audit entry.
//!
//! This crate holds everything the pipeline agrees on and nothing that talks to
//! the outside world:
//!
//! - [`types`]: tickets, users, interactions and their identifiers
//! - [`state`]: the ticket lifecycle and its single transition rule
//! - [`store`]: the [`TicketStore`](store::TicketStore) abstraction
//! - [`queue`]: the [`TaskQueue`](queue::TaskQueue) abstraction
//! - [`directory`]: the [`UserDirectory`](directory::UserDirectory) abstraction
//! - [`error`]: store and queue errors
//! - [`environment`]: injected clock
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  set_ticket_state   ┌──────────────┐
//! │ TicketService│────────────────────►│ TicketStore  │◄──── source of truth
//! └──────┬───────┘                     └──────▲───────┘
//!        │ enqueue (pre-commit)               │ compare-and-set
//!        ▼                                    │ in_progress → closed
//! ┌──────────────┐      dequeue        ┌──────┴───────┐
//! │  TaskQueue   │────────────────────►│CompletionWkr │
//! └──────────────┘◄──── ack/release ───└──────────────┘
//! ```
//!
//! Implementations live in sibling crates: `helpdesk-postgres` (store),
//! `helpdesk-redis` (queue and user cache) and `helpdesk-testing` (in-memory
//! versions of all three).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use chrono::{DateTime, Utc};

pub mod directory;
pub mod error;
pub mod queue;
pub mod state;
pub mod store;
pub mod types;

/// Environment module - dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// explicitly, so several workers and tests can run side by side with
/// isolated instances.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use helpdesk_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use error::{QueueError, StoreError};
pub use state::{InvalidTransition, TicketState, Transition};
pub use types::{
    AuditEntry, Interaction, InteractionId, Priority, Role, Ticket, TicketDraft, TicketId, User,
    UserId,
};
