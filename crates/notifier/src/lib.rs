//! Ad launch notifier process wiring.
//!
//! `run` builds the production adapters (Postgres store, Graph name resolver,
//! HTTP webhook) from a validated [`NotifierConfig`] and drives the
//! reconciliation loop until the shutdown future resolves.

pub mod cli;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use adlaunch_infra::{
    GraphNameResolver, HttpWebhookSink, NameResolver, NotifierConfig, OutcomeStore,
    PostgresOutcomeStore, Reconciler, WebhookSink,
};

pub use cli::Cli;

/// Run the notifier against the configured Postgres database and endpoints.
///
/// Returns `Ok(())` after a graceful shutdown. Adapter construction or schema
/// initialisation failures are returned as errors (exit code 1).
pub async fn run<F>(config: NotifierConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    log_banner(&config);

    let store = PostgresOutcomeStore::new(&config).context("failed to configure outcome store")?;
    let resolver =
        GraphNameResolver::new(&config).context("failed to configure name resolver")?;
    let sink = HttpWebhookSink::new(&config).context("failed to configure webhook client")?;

    let reconciler = Reconciler::new(&config, Arc::new(store), resolver, sink);
    serve(reconciler, shutdown).await
}

/// Ensure the schema, then loop until `shutdown` resolves.
pub async fn serve<S, R, W, F>(reconciler: Reconciler<S, R, W>, shutdown: F) -> anyhow::Result<()>
where
    S: OutcomeStore,
    R: NameResolver,
    W: WebhookSink,
    F: Future<Output = ()>,
{
    reconciler
        .ensure_schema()
        .await
        .context("failed to initialise outcome schema")?;

    reconciler.run_until(shutdown).await;
    info!("notifier stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}

fn log_banner(config: &NotifierConfig) {
    info!(
        webhook_url = %config.webhook_url_preview(),
        meta_access_token = %config.redacted_token(),
        graph_base_url = %config.graph_base_url,
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        retry_failed_after_minutes = config.retry_cooldown.as_secs() / 60,
        recent_window_minutes = ?config.recent_window.map(|w| w.as_secs() / 60),
        failed_eligibility = ?config.failed_eligibility,
        retry_phase_enabled = config.retry_phase_enabled,
        retain_source_records = config.retain_source_records,
        source_table = %config.source_table,
        processed_table = %config.processed_table,
        "ad launch notifier starting"
    );
}
