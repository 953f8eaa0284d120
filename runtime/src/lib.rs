//! # Helpdesk Runtime
//!
//! The moving parts of the ticket-completion pipeline.
//!
//! ## Core Components
//!
//! - **`TicketService`**: ticket operations called by the API layer; moving a
//!   ticket into processing enqueues it as part of the same transaction
//! - **`EnqueueProducer`**: pushes ticket ids onto the task queue with retries
//! - **`CompletionWorker`**: dequeues ids, re-validates the ticket, performs
//!   the completion work, closes the ticket and acknowledges
//! - **`CompletionWork`**: the pluggable step performed before closing
//!
//! Everything is wired against the traits in `helpdesk-core`, so the same
//! code runs on Postgres and Redis in production and on the in-memory
//! implementations from `helpdesk-testing` in tests.
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_runtime::{CompletionWorker, SimulatedWork};
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let worker = CompletionWorker::new(
//!     "worker-0",
//!     queue,
//!     store,
//!     Arc::new(SimulatedWork::default()),
//!     shutdown_tx.subscribe(),
//! );
//! let handle = worker.spawn();
//!
//! // Later
//! let _ = shutdown_tx.send(());
//! handle.await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Pluggable completion step
pub mod work;

/// Enqueue producer
pub mod producer;

/// Completion worker loop
pub mod worker;

/// Ticket management operations
pub mod service;

pub use producer::EnqueueProducer;
pub use retry::RetryPolicy;
pub use service::{NewTicket, ServiceError, TicketService};
pub use work::{CompletionWork, SimulatedWork, WorkError};
pub use worker::{CompletionWorker, DiscardReason, ProcessError, WorkerOutcome};
