//! Worker pool lifecycle against in-memory infrastructure.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use helpdesk::WorkerPool;
use helpdesk_core::queue::TaskQueue;
use helpdesk_core::store::TicketStore;
use helpdesk_core::{Priority, Ticket, TicketId, TicketState, UserId, Utc};
use helpdesk_runtime::{CompletionWorker, RetryPolicy};
use helpdesk_testing::{InMemoryTaskQueue, InMemoryTicketStore, RecordingWork};
use tokio::sync::oneshot;

fn in_progress(id: i64) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: TicketId::new(id),
        owner_id: UserId::new(2),
        subject: format!("Ticket {id}"),
        description: String::new(),
        priority: Priority::Low,
        state: TicketState::InProgress,
        created_at: now,
        updated_at: now,
    }
}

fn pool_of(
    count: usize,
    queue: &InMemoryTaskQueue,
    store: &Arc<InMemoryTicketStore>,
    work: &RecordingWork,
) -> WorkerPool {
    let mut pool = WorkerPool::new(Duration::from_secs(5));
    for index in 0..count {
        let name = format!("worker-{index}");
        let worker = CompletionWorker::new(
            name.clone(),
            Arc::new(queue.handle(name)),
            store.clone(),
            Arc::new(work.clone()),
            pool.subscribe(),
        )
        .with_backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(20))
                .build(),
        );
        pool.add(worker);
    }
    pool
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_drains_queue_then_shuts_down() {
    let store = Arc::new(InMemoryTicketStore::new());
    let queue = InMemoryTaskQueue::new();
    let work = RecordingWork::new().with_delay(Duration::from_millis(10));

    for id in 1..=5 {
        store.seed_ticket(in_progress(id)).await;
        queue.enqueue(TicketId::new(id)).await.unwrap();
    }

    let pool = pool_of(3, &queue, &store, &work);
    assert_eq!(pool.len(), 3);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(pool.run_until(async move {
        let _ = stop_rx.await;
        Ok(())
    }));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut closed = 0;
            for id in 1..=5 {
                let ticket = store.find_ticket(TicketId::new(id)).await.unwrap().unwrap();
                if ticket.state == TicketState::Closed {
                    closed += 1;
                }
            }
            if closed == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pool closes every ticket");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("pool shuts down")
        .unwrap()
        .unwrap();

    let mut performed = work.performed();
    performed.sort();
    assert_eq!(performed, (1..=5).map(TicketId::new).collect::<Vec<_>>());
    for index in 0..3 {
        assert_eq!(queue.handle(format!("worker-{index}")).in_flight_count(), 0);
    }
}

#[tokio::test]
async fn test_empty_pool_returns_signal_result() {
    let pool = WorkerPool::new(Duration::from_secs(1));
    assert!(pool.is_empty());

    let result = pool
        .run_until(async { Err(anyhow::anyhow!("signal handler unavailable")) })
        .await;

    assert!(result.is_err());
}
