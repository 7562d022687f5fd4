//! Stock Ledger Service - HTTP API for the inventory ledger
//!
//! This is the main entry point for the stock ledger service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_ledger_service::{create_router, AppState, IdempotencyGuard, ServiceConfig};
use stock_ledger_store::RocksStore;

/// How often finalized idempotency records past retention are purged.
const IDEMPOTENCY_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stock_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stock Ledger Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        allow_negative_stock = config.allow_negative_stock,
        lock_timeout_ms = config.lock_timeout_ms,
        write_max_retries = config.write_max_retries,
        idempotency_stale_after_seconds = config.idempotency_stale_after_seconds,
        "Service configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open_with(
        &config.data_dir,
        config.store_options(),
    )?);

    // Build app state
    let state = AppState::new(store, config.clone());

    tokio::spawn(purge_idempotency_records(Arc::clone(&state.guard)));

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop finalized idempotency records past retention.
async fn purge_idempotency_records(guard: Arc<IdempotencyGuard>) {
    let mut interval = tokio::time::interval(IDEMPOTENCY_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = guard.purge_expired().await {
            tracing::warn!(error = %e, "Idempotency purge failed");
        }
    }
}
