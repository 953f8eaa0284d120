//! Process wiring and graceful shutdown.
//!
//! [`WorkerPool`] owns a set of completion workers and coordinates their
//! lifecycle:
//!
//! 1. **Startup**: recover each consumer's in-flight messages and spawn it
//! 2. **Runtime**: process tickets until a shutdown signal arrives
//! 3. **Shutdown**: broadcast, then give the workers the configured timeout
//!    (concurrently) to finish the message in hand
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = WorkerPool::connect(&Config::from_env()).await?;
//! pool.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tracing::{info, warn};

use helpdesk_core::environment::SystemClock;
use helpdesk_postgres::PostgresTicketStore;
use helpdesk_redis::{CachedUserDirectory, RedisTaskQueue};
use helpdesk_runtime::{CompletionWorker, EnqueueProducer, RetryPolicy, SimulatedWork, TicketService};

use crate::config::{Config, PostgresConfig};

/// Connect to `PostgreSQL` and apply pending migrations.
///
/// # Errors
///
/// Returns error if the pool cannot connect or a migration fails.
pub async fn connect_store(config: &PostgresConfig) -> anyhow::Result<PostgresTicketStore> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect(&config.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let store = PostgresTicketStore::from_pool(pool);
    store.migrate().await.context("Failed to run migrations")?;
    Ok(store)
}

/// Connect one consumer's queue handle.
///
/// # Errors
///
/// Returns error if Redis is unreachable.
pub async fn connect_queue(config: &Config, consumer: &str) -> anyhow::Result<RedisTaskQueue> {
    let queue = RedisTaskQueue::new(&config.redis.url, &config.redis.queue_name, consumer)
        .await
        .with_context(|| format!("Failed to connect queue for {consumer}"))?;
    Ok(queue.with_poll_timeout(Duration::from_secs(config.redis.poll_timeout)))
}

/// Build the ticket service over `PostgreSQL`, the Redis queue and the
/// cached user directory.
///
/// # Errors
///
/// Returns error if any backend is unreachable.
pub async fn connect_service(config: &Config) -> anyhow::Result<TicketService> {
    let store = Arc::new(connect_store(&config.postgres).await?);
    let queue = connect_queue(config, &format!("{}-producer", config.worker.id)).await?;

    let users = CachedUserDirectory::new(&config.redis.url, store.clone())
        .await
        .context("Failed to connect user cache")?
        .with_ttl(Duration::from_secs(config.redis.user_cache_ttl));

    let producer = EnqueueProducer::new(Arc::new(queue)).with_retry_policy(
        RetryPolicy::builder()
            .max_retries(config.producer.max_retries)
            .initial_delay(Duration::from_millis(config.producer.initial_delay_ms))
            .build(),
    );

    Ok(TicketService::new(
        store,
        Arc::new(users),
        producer,
        Arc::new(SystemClock),
    ))
}

/// A set of completion workers sharing one shutdown signal.
pub struct WorkerPool {
    workers: Vec<CompletionWorker>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            workers: Vec::new(),
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Receiver to hand to a worker before [`add`](Self::add)ing it.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Add a worker.
    pub fn add(&mut self, worker: CompletionWorker) {
        self.workers.push(worker);
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Build a pool of `worker.concurrency` workers over `PostgreSQL` and
    /// Redis, each with its own queue connection and stable consumer name.
    ///
    /// # Errors
    ///
    /// Returns error if any backend is unreachable.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(connect_store(&config.postgres).await?);
        let work = Arc::new(SimulatedWork::new(Duration::from_millis(config.worker.work_delay_ms)));
        let backoff = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(config.worker.backoff_initial_ms))
            .max_delay(Duration::from_millis(config.worker.backoff_max_ms))
            .jitter(true)
            .build();

        let mut pool = Self::new(config.shutdown_timeout());
        for index in 0..config.worker.concurrency {
            let name = config.consumer_name(index);
            let queue = connect_queue(config, &name).await?;

            let worker = CompletionWorker::new(
                name,
                Arc::new(queue),
                store.clone(),
                work.clone(),
                pool.subscribe(),
            )
            .with_work_timeout(Duration::from_secs(config.worker.work_timeout))
            .with_backoff(backoff.clone());
            pool.add(worker);
        }

        info!(workers = pool.len(), queue = %config.redis.queue_name, "Worker pool ready");
        Ok(pool)
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns error if the signal handlers cannot be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns whatever `signal` reports.
    pub async fn run_until<S>(self, signal: S) -> anyhow::Result<()>
    where
        S: Future<Output = anyhow::Result<()>>,
    {
        info!(worker_count = self.workers.len(), "Starting completion workers");
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let name = worker.name().to_string();
                (name, worker.spawn())
            })
            .collect();

        let result = signal.await;
        info!("Shutdown requested, stopping workers...");

        // Workers observe this between messages
        let _ = self.shutdown_tx.send(());

        let timeout = self.shutdown_timeout;
        join_all(handles.into_iter().map(|(name, handle)| async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(consumer = %name, "Worker stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = %name, error = %e, "Worker task failed"),
                Err(_) => warn!(consumer = %name, "Worker shutdown timed out"),
            }
        }))
        .await;

        info!("Graceful shutdown complete");
        result
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Errors
///
/// Returns error if a signal handler cannot be installed.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
    Ok(())
}
