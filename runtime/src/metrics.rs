//! Prometheus metrics for the ticket pipeline.
//!
//! Covers the completion workers, the enqueue producer, store transitions
//! and retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use helpdesk_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by an earlier test), the
    /// call succeeds without serving and [`render`](Self::render) returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }
        // Descriptions only reach the recorder installed at call time
        register_metrics();

        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(_e) = exporter.await {
                // ExporterError (0.15) implements neither Debug nor Display
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Completion worker
    describe_counter!(
        "worker_messages_completed_total",
        "Messages whose ticket was closed by a worker"
    );
    describe_counter!(
        "worker_messages_discarded_total",
        "Messages dropped without work (not found, already closed, not started, lost race)"
    );
    describe_counter!(
        "worker_messages_released_total",
        "Messages returned to the queue after a failed attempt"
    );
    describe_counter!(
        "worker_dequeue_errors_total",
        "Failed dequeue calls"
    );
    describe_histogram!(
        "worker_work_duration_seconds",
        "Time spent in the completion work step"
    );

    // Producer
    describe_counter!(
        "producer_enqueued_total",
        "Ticket ids appended to the task queue"
    );
    describe_counter!(
        "producer_enqueue_failures_total",
        "Enqueue calls that failed after retries"
    );

    // Store
    describe_counter!(
        "store_transitions_total",
        "Ticket state transitions committed, by target state"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Completion worker metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a closed ticket.
    pub fn record_completed(work_duration: Duration) {
        counter!("worker_messages_completed_total").increment(1);
        histogram!("worker_work_duration_seconds").record(work_duration.as_secs_f64());
    }

    /// Record a discarded message.
    pub fn record_discarded(reason: &'static str) {
        counter!("worker_messages_discarded_total", "reason" => reason).increment(1);
    }

    /// Record a released message.
    pub fn record_released() {
        counter!("worker_messages_released_total").increment(1);
    }

    /// Record a dequeue error.
    pub fn record_dequeue_error() {
        counter!("worker_dequeue_errors_total").increment(1);
    }
}

/// Enqueue producer metrics recorder.
pub struct ProducerMetrics;

impl ProducerMetrics {
    /// Record a successful enqueue.
    pub fn record_enqueued() {
        counter!("producer_enqueued_total").increment(1);
    }

    /// Record an enqueue that failed for good.
    pub fn record_failure() {
        counter!("producer_enqueue_failures_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
