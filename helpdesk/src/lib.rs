//! # Helpdesk
//!
//! Process wiring for the helpdesk ticket pipeline: configuration, the
//! completion worker pool and its graceful shutdown.
//!
//! Binaries:
//! - `helpdesk-worker`: runs a [`WorkerPool`] against `PostgreSQL` and Redis
//! - `helpdesk-reconcile`: re-enqueues tickets stuck `en_proceso`

pub mod app;
pub mod config;

pub use app::{WorkerPool, connect_queue, connect_service, connect_store, shutdown_signal};
pub use config::Config;

/// Install the `tracing` subscriber used by the binaries.
///
/// `filter` takes `EnvFilter` directives, normally
/// [`ServerConfig::log_level`](config::ServerConfig::log_level). Invalid
/// directives fall back to `info`.
pub fn init_tracing(filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(log_filter(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_filter(directives: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(directives)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_uses_configured_directives() {
        let config = Config::from_lookup(|key| {
            (key == "RUST_LOG").then(|| "warn,helpdesk_runtime=trace".to_string())
        });
        let filter = log_filter(&config.server.log_level).to_string();
        assert!(filter.contains("helpdesk_runtime=trace"));
        assert!(filter.contains("warn"));
    }

    #[test]
    fn test_invalid_log_filter_falls_back_to_info() {
        assert_eq!(log_filter("helpdesk=loud").to_string(), "info");
    }
}
