//! Helpdesk Completion Worker
//!
//! Takes ticket ids off the Redis queue, performs the completion work and
//! closes each ticket in `PostgreSQL`.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run four workers in this process
//! WORKER_CONCURRENCY=4 cargo run --bin helpdesk-worker
//! ```

use helpdesk::{Config, WorkerPool};
use helpdesk_runtime::metrics::MetricsServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    helpdesk::init_tracing(&config.server.log_level);

    tracing::info!(
        worker = %config.worker.id,
        concurrency = config.worker.concurrency,
        queue = %config.redis.queue_name,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr().parse()?);
    metrics.start()?;
    tracing::info!(address = %config.metrics_addr(), "Metrics exporter started");

    let pool = WorkerPool::connect(&config).await?;
    pool.run().await
}
