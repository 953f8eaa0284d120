//! # Helpdesk Testing
//!
//! Testing utilities for the helpdesk pipeline.
//!
//! This crate provides:
//! - In-memory implementations of the store, queue and directory traits
//! - Completion work that records and fails on demand
//! - Deterministic clocks and user fixtures
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_testing::{InMemoryTaskQueue, InMemoryTicketStore, RecordingWork};
//!
//! #[tokio::test]
//! async fn closes_ticket() {
//!     let store = Arc::new(InMemoryTicketStore::new());
//!     let queue = InMemoryTaskQueue::new();
//!     let work = RecordingWork::new();
//!     let (_tx, rx) = tokio::sync::broadcast::channel(1);
//!     let worker = CompletionWorker::new("w", Arc::new(queue.handle("w")), store, Arc::new(work), rx);
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use helpdesk_core::environment::Clock;

mod directory;
mod queue;
mod store;
mod work;

pub use directory::InMemoryUserDirectory;
pub use queue::InMemoryTaskQueue;
pub use store::InMemoryTicketStore;
pub use work::RecordingWork;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use helpdesk_testing::mocks::FixedClock;
    /// use helpdesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`.
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// User fixtures.
pub mod fixtures {
    use helpdesk_core::environment::Clock;
    use helpdesk_core::{Role, User, UserId};

    use super::mocks::test_clock;

    fn user(id: i64, name: &str, role: Role) -> User {
        User {
            id: UserId::new(id),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            role,
            created_at: test_clock().now(),
        }
    }

    /// An operator.
    #[must_use]
    pub fn operator(id: i64, name: &str) -> User {
        user(id, name, Role::Operator)
    }

    /// A client.
    #[must_use]
    pub fn client(id: i64, name: &str) -> User {
        user(id, name, Role::Client)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
