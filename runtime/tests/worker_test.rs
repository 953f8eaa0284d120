//! Integration tests for the completion worker.
//!
//! Drive single iterations with `process_one` and the full loop with
//! `spawn`, against the in-memory store and queue.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

mod common;

use std::time::Duration;

use common::{Pipeline, seeded_ticket};
use helpdesk_core::queue::TaskQueue;
use helpdesk_core::store::{PreCommit, TicketStore};
use helpdesk_core::{AuditEntry, TicketId, TicketState};
use helpdesk_runtime::{CompletionWorker, DiscardReason, WorkerOutcome};
use helpdesk_testing::RecordingWork;
use tokio::sync::broadcast;

#[tokio::test]
async fn scenario_42_closes_once_and_ignores_redelivery() {
    let pipeline = Pipeline::new();
    pipeline.store.seed_ticket(seeded_ticket(41, TicketState::Closed)).await;
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);

    let id = pipeline.start_ticket("Cannot log in").await;
    assert_eq!(id, TicketId::new(42));
    assert_eq!(pipeline.queue.pending_ids(), vec![TicketId::new(42)]);

    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Completed);
    assert_eq!(pipeline.ticket(id).await.state, TicketState::Closed);
    assert_eq!(
        pipeline.history_messages(id).await,
        vec![
            "Ticket creado por Ana para Luis",
            "Estado cambiado a en_proceso",
            "Estado cambiado a cerrado",
        ]
    );

    // Same message delivered again
    pipeline.queue.enqueue(id).await.unwrap();
    assert_eq!(
        pipeline.step(&worker).await,
        WorkerOutcome::Discarded(DiscardReason::AlreadyClosed)
    );
    assert_eq!(pipeline.history_messages(id).await.len(), 3);
    assert_eq!(pipeline.work.performed(), vec![id]);
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);
}

#[tokio::test]
async fn scenario_7_message_after_manual_close_is_discarded() {
    let pipeline = Pipeline::new();
    pipeline.store.seed_ticket(seeded_ticket(7, TicketState::InProgress)).await;
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);

    pipeline
        .service
        .set_ticket_state(TicketId::new(7), TicketState::Closed)
        .await
        .unwrap();
    pipeline.queue.enqueue(TicketId::new(7)).await.unwrap();

    assert_eq!(
        pipeline.step(&worker).await,
        WorkerOutcome::Discarded(DiscardReason::AlreadyClosed)
    );
    assert!(pipeline.work.performed().is_empty());
    assert_eq!(
        pipeline.history_messages(TicketId::new(7)).await,
        vec!["Estado cambiado a cerrado"]
    );
}

#[tokio::test]
async fn open_ticket_is_never_touched() {
    let pipeline = Pipeline::new();
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);

    let id = pipeline.open_ticket("Spurious").await;
    pipeline.queue.enqueue(id).await.unwrap();

    assert_eq!(
        pipeline.step(&worker).await,
        WorkerOutcome::Discarded(DiscardReason::NotStarted)
    );
    assert_eq!(pipeline.ticket(id).await.state, TicketState::Open);
    assert_eq!(pipeline.history_messages(id).await.len(), 1);
    assert!(pipeline.work.performed().is_empty());
}

#[tokio::test]
async fn unknown_ticket_is_acknowledged_and_dropped() {
    let pipeline = Pipeline::new();
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);

    pipeline.queue.enqueue(TicketId::new(999)).await.unwrap();

    assert_eq!(
        pipeline.step(&worker).await,
        WorkerOutcome::Discarded(DiscardReason::NotFound)
    );
    assert_eq!(pipeline.queue.pending().await.unwrap(), 0);
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);
}

#[tokio::test]
async fn failed_work_releases_and_redelivery_completes() {
    let pipeline = Pipeline::new().with_work(RecordingWork::new().failing_first(1));
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);
    let id = pipeline.start_ticket("Flaky").await;

    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Released);
    assert_eq!(pipeline.ticket(id).await.state, TicketState::InProgress);
    assert_eq!(pipeline.queue.pending_ids(), vec![id]);
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);

    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Completed);
    assert_eq!(pipeline.work.performed(), vec![id, id]);
    let closures = pipeline
        .history_messages(id)
        .await
        .into_iter()
        .filter(|m| m == "Estado cambiado a cerrado")
        .count();
    assert_eq!(closures, 1);
}

#[tokio::test]
async fn failed_commit_releases_and_redelivery_completes() {
    let pipeline = Pipeline::new();
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline.worker("worker-0", rx);
    let id = pipeline.start_ticket("Database hiccup").await;

    pipeline.store.fail_next_transitions(1);
    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Released);
    assert_eq!(pipeline.ticket(id).await.state, TicketState::InProgress);
    assert_eq!(pipeline.history_messages(id).await.len(), 2);
    assert_eq!(pipeline.queue.pending_ids(), vec![id]);

    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Completed);
    assert_eq!(pipeline.ticket(id).await.state, TicketState::Closed);
    assert_eq!(pipeline.history_messages(id).await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn work_timeout_releases_the_message() {
    let pipeline =
        Pipeline::new().with_work(RecordingWork::new().with_delay(Duration::from_secs(120)));
    let (_tx, rx) = broadcast::channel(1);
    let worker = pipeline
        .worker("worker-0", rx)
        .with_work_timeout(Duration::from_secs(60));
    let id = pipeline.start_ticket("Slow").await;

    assert_eq!(pipeline.step(&worker).await, WorkerOutcome::Released);
    assert_eq!(pipeline.ticket(id).await.state, TicketState::InProgress);
    assert_eq!(pipeline.queue.pending_ids(), vec![id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_close_a_ticket_once() {
    let pipeline =
        Pipeline::new().with_work(RecordingWork::new().with_delay(Duration::from_millis(50)));
    let (_tx, rx) = broadcast::channel(1);
    let first = pipeline.worker("worker-a", rx.resubscribe());
    let second = pipeline.worker("worker-b", rx);

    let id = pipeline.start_ticket("Duplicate delivery").await;
    // A redelivered copy of the same message
    pipeline.queue.enqueue(id).await.unwrap();

    let (a, b) = tokio::join!(pipeline.step(&first), pipeline.step(&second));

    let completed = [a, b]
        .iter()
        .filter(|o| **o == WorkerOutcome::Completed)
        .count();
    assert_eq!(completed, 1, "outcomes: {a:?}, {b:?}");
    assert!(
        matches!(a, WorkerOutcome::Discarded(_)) || matches!(b, WorkerOutcome::Discarded(_)),
        "outcomes: {a:?}, {b:?}"
    );

    let closures = pipeline
        .history_messages(id)
        .await
        .into_iter()
        .filter(|m| m == "Estado cambiado a cerrado")
        .count();
    assert_eq!(closures, 1);
    assert_eq!(pipeline.queue.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn spawned_worker_closes_tickets_and_stops_on_shutdown() {
    let pipeline = Pipeline::new();
    let (tx, rx) = broadcast::channel(1);
    let handle = pipeline.worker("worker-0", rx).spawn();

    let first = pipeline.start_ticket("First").await;
    let second = pipeline.start_ticket("Second").await;
    pipeline.wait_for_state(first, TicketState::Closed).await;
    pipeline.wait_for_state(second, TicketState::Closed).await;

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops")
        .unwrap();

    assert_eq!(pipeline.work.performed(), vec![first, second]);
    assert_eq!(pipeline.queue.pending().await.unwrap(), 0);
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);
}

#[tokio::test]
async fn restarted_worker_recovers_in_flight_message() {
    let pipeline = Pipeline::new();
    let id = pipeline.start_ticket("Crashed mid-flight").await;

    // A previous run took the message and died before acknowledging it.
    let crashed = pipeline.queue.handle("worker-0");
    let _lost = crashed.dequeue().await.unwrap();
    drop(crashed);
    assert_eq!(pipeline.queue.pending().await.unwrap(), 0);

    let (tx, rx) = broadcast::channel(1);
    let handle = pipeline.worker("worker-0", rx).spawn();
    pipeline.wait_for_state(id, TicketState::Closed).await;

    tx.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);
}

#[tokio::test]
async fn idle_worker_exits_when_sender_is_dropped() {
    let pipeline = Pipeline::new();
    let (tx, rx) = broadcast::channel::<()>(1);
    let worker: CompletionWorker = pipeline.worker("worker-0", rx);
    let handle = worker.spawn();

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops")
        .unwrap();
}

#[tokio::test]
async fn workers_share_nothing_but_the_store() {
    let pipeline = Pipeline::new();
    let (tx, rx) = broadcast::channel(1);
    let handles: Vec<_> = (0..3)
        .map(|n| pipeline.worker(&format!("worker-{n}"), rx.resubscribe()).spawn())
        .collect();
    drop(rx);

    let mut ids = Vec::new();
    for n in 0..6 {
        ids.push(pipeline.start_ticket(&format!("Batch {n}")).await);
    }
    for id in &ids {
        pipeline.wait_for_state(*id, TicketState::Closed).await;
    }

    tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    for id in ids {
        assert_eq!(pipeline.history_messages(id).await.len(), 3);
    }
    assert_eq!(pipeline.work.performed().len(), 6);
}

#[tokio::test]
async fn message_delivered_before_commit_waits_for_the_state_change() {
    let pipeline = Pipeline::new();
    let (tx, rx) = broadcast::channel(1);
    let handle = pipeline.worker("worker-0", rx).spawn();

    let id = pipeline.open_ticket("Enqueued before commit").await;

    // Hold the transaction open after the enqueue, as a slow COMMIT would.
    let (enqueued_tx, enqueued_rx) = tokio::sync::oneshot::channel();
    let (commit_tx, commit_rx) = tokio::sync::oneshot::channel::<()>();
    let writer = {
        let store = pipeline.store.clone();
        let queue = pipeline.queue.clone();
        tokio::spawn(async move {
            let transition = TicketState::Open.transition_to(TicketState::InProgress).unwrap();
            let entry = AuditEntry::operator(transition.audit_message());
            let step: PreCommit<'_> = Box::pin(async move {
                queue.enqueue(id).await?;
                enqueued_tx.send(()).unwrap();
                commit_rx.await.unwrap();
                Ok(())
            });
            store.transition(id, transition, entry, Some(step)).await
        })
    };
    enqueued_rx.await.unwrap();

    // The worker has the id but must not judge the uncommitted ticket
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.ticket(id).await.state, TicketState::Open);
    assert!(pipeline.work.performed().is_empty());

    commit_tx.send(()).unwrap();
    assert!(writer.await.unwrap().unwrap().is_applied());
    pipeline.wait_for_state(id, TicketState::Closed).await;

    tx.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(pipeline.work.performed(), vec![id]);
    assert_eq!(pipeline.history_messages(id).await.len(), 3);
    assert_eq!(pipeline.queue.handle("worker-0").in_flight_count(), 0);
}
