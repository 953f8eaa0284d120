//! In-memory task queue.
//!
//! One shared backend, many consumer handles. Each handle keeps its own
//! in-flight list, like the per-consumer processing lists of the Redis queue,
//! so a test can "crash" a consumer by dropping its handle with a message
//! unacknowledged and bring it back with [`TaskQueue::recover`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use helpdesk_core::queue::{Delivery, QueueFuture, TaskQueue};
use helpdesk_core::{QueueError, TicketId};

#[derive(Debug, Default)]
struct Lists {
    pending: VecDeque<TicketId>,
    in_flight: HashMap<String, Vec<(u64, TicketId)>>,
    next_receipt: u64,
    failing_enqueues: usize,
    enqueued_total: usize,
}

#[derive(Debug, Default)]
struct Backend {
    lists: Mutex<Lists>,
    available: Notify,
}

/// In-memory [`TaskQueue`] with failure injection.
///
/// # Example
///
/// ```
/// use helpdesk_testing::InMemoryTaskQueue;
/// use helpdesk_core::queue::TaskQueue;
/// use helpdesk_core::TicketId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = InMemoryTaskQueue::new();
/// let consumer = producer.handle("worker-0");
///
/// producer.enqueue(TicketId::new(42)).await?;
/// let delivery = consumer.dequeue().await?;
/// assert_eq!(delivery.ticket_id(), TicketId::new(42));
/// consumer.ack(&delivery).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTaskQueue {
    backend: Arc<Backend>,
    consumer: String,
}

impl InMemoryTaskQueue {
    /// Create an empty queue. The returned handle is named `producer`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Backend::default()),
            consumer: "producer".to_string(),
        }
    }

    /// Another handle on the same queue, with its own in-flight list.
    ///
    /// Two handles with the same name share an in-flight list, which is how
    /// a restarted consumer finds the messages of its previous run.
    #[must_use]
    pub fn handle(&self, consumer: impl Into<String>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            consumer: consumer.into(),
        }
    }

    /// Make the next `count` enqueues fail with a connection error.
    pub fn fail_next_enqueues(&self, count: usize) {
        self.backend.lists.lock().unwrap().failing_enqueues = count;
    }

    /// Ticket ids waiting to be dequeued, head first.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<TicketId> {
        self.backend.lists.lock().unwrap().pending.iter().copied().collect()
    }

    /// Messages this handle holds unacknowledged.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.backend
            .lists
            .lock()
            .unwrap()
            .in_flight
            .get(&self.consumer)
            .map_or(0, Vec::len)
    }

    /// Successful enqueues since creation.
    #[must_use]
    pub fn enqueued_total(&self) -> usize {
        self.backend.lists.lock().unwrap().enqueued_total
    }

    fn take(&self) -> Option<Delivery> {
        let mut lists = self.backend.lists.lock().unwrap();
        let ticket_id = lists.pending.pop_front()?;
        lists.next_receipt += 1;
        let receipt = lists.next_receipt;
        lists
            .in_flight
            .entry(self.consumer.clone())
            .or_default()
            .push((receipt, ticket_id));
        Some(Delivery::new(ticket_id, receipt.to_string()))
    }

    fn remove_in_flight(&self, delivery: &Delivery) -> Result<TicketId, QueueError> {
        let not_in_flight = || QueueError::AcknowledgeFailed {
            ticket_id: delivery.ticket_id(),
            reason: format!("receipt {} is not in flight", delivery.receipt()),
        };

        let receipt: u64 = delivery.receipt().parse().map_err(|_| not_in_flight())?;
        let mut lists = self.backend.lists.lock().unwrap();
        let held = lists.in_flight.get_mut(&self.consumer).ok_or_else(not_in_flight)?;
        let position = held
            .iter()
            .position(|(r, _)| *r == receipt)
            .ok_or_else(not_in_flight)?;
        Ok(held.remove(position).1)
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue(&self, ticket_id: TicketId) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut lists = self.backend.lists.lock().unwrap();
                if lists.failing_enqueues > 0 {
                    lists.failing_enqueues -= 1;
                    return Err(QueueError::ConnectionFailed(
                        "injected enqueue failure".to_string(),
                    ));
                }
                lists.pending.push_back(ticket_id);
                lists.enqueued_total += 1;
            }
            self.backend.available.notify_waiters();
            Ok(())
        })
    }

    fn dequeue(&self) -> QueueFuture<'_, Delivery> {
        Box::pin(async move {
            loop {
                // Registered before checking so an enqueue in between is not missed.
                let notified = self.backend.available.notified();
                if let Some(delivery) = self.take() {
                    return Ok(delivery);
                }
                notified.await;
            }
        })
    }

    fn ack<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.remove_in_flight(delivery)?;
            Ok(())
        })
    }

    fn release<'a>(&'a self, delivery: &'a Delivery) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let ticket_id = self.remove_in_flight(delivery)?;
            self.backend.lists.lock().unwrap().pending.push_back(ticket_id);
            self.backend.available.notify_waiters();
            Ok(())
        })
    }

    fn recover(&self) -> QueueFuture<'_, usize> {
        Box::pin(async move {
            let recovered = {
                let mut lists = self.backend.lists.lock().unwrap();
                let held = lists.in_flight.remove(&self.consumer).unwrap_or_default();
                for (_, ticket_id) in held.iter().rev() {
                    lists.pending.push_front(*ticket_id);
                }
                held.len()
            };
            if recovered > 0 {
                self.backend.available.notify_waiters();
            }
            Ok(recovered)
        })
    }

    fn pending(&self) -> QueueFuture<'_, usize> {
        Box::pin(async move { Ok(self.backend.lists.lock().unwrap().pending.len()) })
    }
}
