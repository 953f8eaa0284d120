//! Integration tests for the Redis queue and user cache using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running to execute these tests.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code uses expect for clear failure messages

use std::sync::Arc;
use std::time::Duration;

use helpdesk_core::directory::UserDirectory;
use helpdesk_core::queue::TaskQueue;
use helpdesk_core::{QueueError, TicketId, UserId};
use helpdesk_redis::{CacheError, CachedUserDirectory, RedisTaskQueue};
use helpdesk_testing::InMemoryUserDirectory;
use helpdesk_testing::fixtures::{client, operator};
use redis::AsyncCommands;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};

const QUEUE: &str = "cola_tickets";

/// Start a Redis container and return its URL once it answers PING.
///
/// `BLMOVE`/`LMOVE` need Redis 6.2 or newer.
async fn setup_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .with_tag("7.2")
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");

    let url = format!("redis://127.0.0.1:{port}");

    let mut retries = 0;
    let max_retries = 30;
    loop {
        if let Ok(client) = redis::Client::open(url.as_str()) {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
                if pong.is_ok() {
                    return (container, url);
                }
            }
        }

        assert!(retries < max_retries, "Failed to connect after {max_retries} retries");
        retries += 1;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn raw(url: &str) -> redis::aio::MultiplexedConnection {
    redis::Client::open(url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

async fn consumer(url: &str, name: &str) -> RedisTaskQueue {
    RedisTaskQueue::new(url, QUEUE, name)
        .await
        .expect("Failed to connect queue")
        .with_poll_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn test_fifo_delivery_and_ack() {
    let (_container, url) = setup_redis().await;
    let queue = consumer(&url, "worker-0").await;

    for id in [42, 7, 13] {
        queue.enqueue(TicketId::new(id)).await.unwrap();
    }
    assert_eq!(queue.pending().await.unwrap(), 3);

    let first = queue.dequeue().await.unwrap();
    let second = queue.dequeue().await.unwrap();
    assert_eq!(first.ticket_id(), TicketId::new(42));
    assert_eq!(second.ticket_id(), TicketId::new(7));
    assert_eq!(queue.pending().await.unwrap(), 1);
    assert_eq!(queue.in_flight().await.unwrap(), 2);

    queue.ack(&first).await.unwrap();
    queue.ack(&second).await.unwrap();
    assert_eq!(queue.in_flight().await.unwrap(), 0);
}

#[tokio::test]
async fn test_payload_is_decimal_ticket_id() {
    let (_container, url) = setup_redis().await;
    let queue = consumer(&url, "worker-0").await;

    queue.enqueue(TicketId::new(42)).await.unwrap();

    let mut conn = raw(&url).await;
    let items: Vec<String> = conn.lrange(QUEUE, 0, -1).await.unwrap();
    assert_eq!(items, vec!["42".to_string()]);
}

#[tokio::test]
async fn test_release_requeues_at_tail() {
    let (_container, url) = setup_redis().await;
    let queue = consumer(&url, "worker-0").await;

    queue.enqueue(TicketId::new(1)).await.unwrap();
    queue.enqueue(TicketId::new(2)).await.unwrap();

    let delivery = queue.dequeue().await.unwrap();
    assert_eq!(delivery.ticket_id(), TicketId::new(1));
    queue.release(&delivery).await.unwrap();
    assert_eq!(queue.in_flight().await.unwrap(), 0);

    assert_eq!(queue.dequeue().await.unwrap().ticket_id(), TicketId::new(2));
    assert_eq!(queue.dequeue().await.unwrap().ticket_id(), TicketId::new(1));
}

#[tokio::test]
async fn test_recover_returns_unacked_messages_in_order() {
    let (_container, url) = setup_redis().await;

    {
        let crashed = consumer(&url, "worker-0").await;
        for id in [1, 2, 3] {
            crashed.enqueue(TicketId::new(id)).await.unwrap();
        }
        crashed.dequeue().await.unwrap();
        crashed.dequeue().await.unwrap();
    }

    let restarted = consumer(&url, "worker-0").await;
    assert_eq!(restarted.recover().await.unwrap(), 2);
    assert_eq!(restarted.in_flight().await.unwrap(), 0);

    let order: Vec<_> = [
        restarted.dequeue().await.unwrap(),
        restarted.dequeue().await.unwrap(),
        restarted.dequeue().await.unwrap(),
    ]
    .iter()
    .map(|d| d.ticket_id().get())
    .collect();
    assert_eq!(order, vec![1, 2, 3]);

    // Another consumer's in-flight list is untouched
    let other = consumer(&url, "worker-1").await;
    assert_eq!(other.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dequeue_blocks_across_poll_timeouts() {
    let (_container, url) = setup_redis().await;
    let queue = consumer(&url, "worker-0").await;
    let producer = consumer(&url, "producer").await;

    let waiting = tokio::spawn(async move { queue.dequeue().await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!waiting.is_finished());

    producer.enqueue(TicketId::new(42)).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("dequeue wakes up")
        .unwrap()
        .unwrap();
    assert_eq!(delivery.ticket_id(), TicketId::new(42));
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let (_container, url) = setup_redis().await;
    let queue = consumer(&url, "worker-0").await;

    let mut conn = raw(&url).await;
    let _: () = conn.rpush(QUEUE, "not-a-number").await.unwrap();
    queue.enqueue(TicketId::new(5)).await.unwrap();

    let err = queue.dequeue().await.unwrap_err();
    assert!(matches!(err, QueueError::MalformedPayload(ref p) if p == "not-a-number"));
    assert_eq!(queue.in_flight().await.unwrap(), 0);

    assert_eq!(queue.dequeue().await.unwrap().ticket_id(), TicketId::new(5));
}

#[tokio::test]
async fn test_connect_to_unreachable_redis() {
    let result = RedisTaskQueue::new("redis://127.0.0.1:1", QUEUE, "worker-0").await;
    assert!(matches!(result, Err(QueueError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_cache_connect_to_unreachable_redis() {
    let inner = InMemoryUserDirectory::with_users([client(2, "Luis")]);
    let result = CachedUserDirectory::new("redis://127.0.0.1:1", Arc::new(inner)).await;
    let err = result.expect_err("unreachable cache must fail");
    assert!(matches!(err, CacheError::ConnectionFailed(_)));
    assert!(err.to_string().starts_with("User cache connection failed"));
}

#[tokio::test]
async fn test_cached_directory_reads_through() {
    let (_container, url) = setup_redis().await;
    let inner = InMemoryUserDirectory::with_users([operator(1, "Ana"), client(2, "Luis")]);
    let cache = CachedUserDirectory::new(&url, Arc::new(inner.clone()))
        .await
        .unwrap();

    let first = cache.find_user(UserId::new(2)).await.unwrap().unwrap();
    let second = cache.find_user(UserId::new(2)).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.name, "Luis");
    assert_eq!(inner.lookups(), 1);

    let mut conn = raw(&url).await;
    let ttl: i64 = conn.ttl("usuario:2").await.unwrap();
    assert!(ttl > 0 && ttl <= 3600);

    // Misses are not cached
    assert!(cache.find_user(UserId::new(9)).await.unwrap().is_none());
    assert!(cache.find_user(UserId::new(9)).await.unwrap().is_none());
    assert_eq!(inner.lookups(), 3);

    assert_eq!(cache.list_users().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_reload() {
    let (_container, url) = setup_redis().await;
    let inner = InMemoryUserDirectory::with_users([client(2, "Luis")]);
    let cache = CachedUserDirectory::new(&url, Arc::new(inner.clone()))
        .await
        .unwrap()
        .with_ttl(Duration::from_secs(60));

    cache.find_user(UserId::new(2)).await.unwrap();
    inner.insert(client(2, "Luis Gómez"));
    assert_eq!(cache.find_user(UserId::new(2)).await.unwrap().unwrap().name, "Luis");

    cache.invalidate(UserId::new(2)).await;
    assert_eq!(
        cache.find_user(UserId::new(2)).await.unwrap().unwrap().name,
        "Luis Gómez"
    );
}
