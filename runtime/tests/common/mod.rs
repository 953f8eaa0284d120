//! Shared wiring for the runtime integration tests.

#![allow(dead_code)] // Each test binary uses a different subset
#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use std::sync::Arc;
use std::time::Duration;

use helpdesk_core::environment::{Clock, SystemClock};
use helpdesk_core::queue::TaskQueue;
use helpdesk_core::store::TicketStore;
use helpdesk_core::{Priority, Ticket, TicketId, TicketState, UserId};
use helpdesk_runtime::{
    CompletionWorker, EnqueueProducer, NewTicket, RetryPolicy, TicketService, WorkerOutcome,
};
use helpdesk_testing::fixtures::{client, operator};
use helpdesk_testing::{InMemoryTaskQueue, InMemoryTicketStore, InMemoryUserDirectory, RecordingWork};
use tokio::sync::broadcast;

pub const OPERATOR: UserId = UserId::new(1);
pub const CLIENT: UserId = UserId::new(2);
pub const OTHER_CLIENT: UserId = UserId::new(3);

/// Route worker and service logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("helpdesk_runtime=debug")
        .try_init();
}

/// Store, queue, directory, service and work, all in memory.
pub struct Pipeline {
    pub store: InMemoryTicketStore,
    pub queue: InMemoryTaskQueue,
    pub users: InMemoryUserDirectory,
    pub work: RecordingWork,
    pub service: TicketService,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        init_tracing();
        let store = InMemoryTicketStore::new().with_clock(Arc::clone(&clock));
        let queue = InMemoryTaskQueue::new();
        let users = InMemoryUserDirectory::with_users([
            operator(OPERATOR.get(), "Ana"),
            client(CLIENT.get(), "Luis"),
            client(OTHER_CLIENT.get(), "Marta"),
        ]);
        let producer = EnqueueProducer::new(Arc::new(queue.clone())).with_retry_policy(fast_retry());
        let service = TicketService::new(
            Arc::new(store.clone()),
            Arc::new(users.clone()),
            producer,
            clock,
        );

        Self {
            store,
            queue,
            users,
            work: RecordingWork::new(),
            service,
        }
    }

    #[must_use]
    pub fn with_work(mut self, work: RecordingWork) -> Self {
        self.work = work;
        self
    }

    /// A worker with its own queue handle named `name`.
    pub fn worker(&self, name: &str, shutdown: broadcast::Receiver<()>) -> CompletionWorker {
        CompletionWorker::new(
            name,
            Arc::new(self.queue.handle(name)),
            Arc::new(self.store.clone()),
            Arc::new(self.work.clone()),
            shutdown,
        )
        .with_backoff(fast_retry())
    }

    /// Open a ticket for `CLIENT`.
    pub async fn open_ticket(&self, subject: &str) -> TicketId {
        self.service
            .create_ticket(NewTicket {
                operator_id: OPERATOR,
                owner_id: CLIENT,
                subject: subject.to_string(),
                description: "Reported by phone".to_string(),
                priority: Priority::High,
            })
            .await
            .expect("create ticket")
    }

    /// Open a ticket and move it into processing (which enqueues it).
    pub async fn start_ticket(&self, subject: &str) -> TicketId {
        let id = self.open_ticket(subject).await;
        self.service
            .set_ticket_state(id, TicketState::InProgress)
            .await
            .expect("start ticket");
        id
    }

    pub async fn ticket(&self, id: TicketId) -> Ticket {
        self.store.find_ticket(id).await.unwrap().expect("ticket exists")
    }

    pub async fn history_messages(&self, id: TicketId) -> Vec<String> {
        self.store
            .list_history(id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.message)
            .collect()
    }

    /// Dequeue one message on `worker`'s handle and process it.
    pub async fn step(&self, worker: &CompletionWorker) -> WorkerOutcome {
        let handle = self.queue.handle(worker.name());
        let delivery = handle.dequeue().await.unwrap();
        worker.process_one(&delivery).await
    }

    /// Poll until `id` reaches `state`, or give up after five seconds.
    pub async fn wait_for_state(&self, id: TicketId, state: TicketState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.ticket(id).await.state != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ticket reached expected state");
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

pub fn seeded_ticket(id: i64, state: TicketState) -> Ticket {
    let now = helpdesk_core::Utc::now();
    Ticket {
        id: TicketId::new(id),
        owner_id: CLIENT,
        subject: format!("Seeded {id}"),
        description: String::new(),
        priority: Priority::Medium,
        state,
        created_at: now,
        updated_at: now,
    }
}
