//! reconcile-worker — runs the scan scheduler for the configured store.
//!
//! Wires the JSON store, the directory backend, and the notification
//! dispatcher into a [`ScanScheduler`] and drives it until SIGINT.
//!
//! The directory backend here is the in-memory implementation;
//! deployments integrate a real membership directory by implementing
//! the `Directory` trait and swapping it in at this seam.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use rolesync_core::{config::load_dotenv, Config};
use rolesync_directory::{Directory, InMemoryDirectory};
use rolesync_engine::ScanScheduler;
use rolesync_notify::{Dispatcher, Notifier, WebhookNotifier};
use rolesync_store::JsonStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Periodic membership rule reconciliation worker.
#[derive(Parser, Debug)]
#[command(name = "reconcile-worker", version, about)]
struct Cli {
    /// Path to the JSON store file (overrides DATA_FILE).
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Scheduler tick period in milliseconds (overrides TICK_INTERVAL_MS).
    #[arg(long)]
    tick_interval_ms: Option<u64>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.data_file {
        config.store.data_file = path;
    }
    if let Some(tick) = cli.tick_interval_ms {
        config.engine.tick_interval_ms = tick;
        config.engine = config.engine.clone().normalized();
    }
    config.log_summary();

    let store = Arc::new(JsonStore::open(
        config.store.data_file.clone(),
        config.engine.interval_bounds(),
    )?);

    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());

    // One webhook channel per tenant that configured one.
    let mut dispatcher = Dispatcher::empty();
    for tenant in store.tenants() {
        if let Some(url) = &tenant.log_webhook {
            match WebhookNotifier::new(url) {
                Ok(channel) => {
                    let channels: Vec<Box<dyn Notifier>> = vec![Box::new(channel)];
                    dispatcher.set_tenant_channels(tenant.tenant_id.clone(), channels);
                }
                Err(e) => {
                    warn!(
                        tenant = %tenant.tenant_id,
                        error = %e,
                        "invalid webhook configuration; channel skipped"
                    );
                }
            }
        }
    }

    let scheduler = Arc::new(ScanScheduler::new(
        store,
        directory,
        Arc::new(dispatcher),
        config.engine.clone(),
    ));

    info!("reconcile-worker starting");
    let run_handle = tokio::spawn(Arc::clone(&scheduler).run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.shutdown();
    run_handle.await?;

    info!("reconcile-worker exited cleanly");
    Ok(())
}
