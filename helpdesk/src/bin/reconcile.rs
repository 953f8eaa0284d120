//! Helpdesk Reconciliation Sweep
//!
//! Re-enqueues every ticket that has been `en_proceso` for longer than
//! `RECONCILE_AFTER` seconds, then exits. Safe to run from cron: workers
//! discard duplicates.

use std::time::Duration;

use helpdesk::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    helpdesk::init_tracing(&config.server.log_level);

    let service = helpdesk::connect_service(&config).await?;

    let requeued = service
        .reconcile_stalled(Duration::from_secs(config.server.reconcile_after))
        .await?;

    tracing::info!(
        count = requeued.len(),
        tickets = ?requeued,
        "Reconciliation sweep complete"
    );
    Ok(())
}
