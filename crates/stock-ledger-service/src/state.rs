//! Application state.

use std::sync::Arc;

use stock_ledger_store::{RocksStore, Store};

use crate::config::ServiceConfig;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::LedgerWriter;
use crate::reconciliation::ReconciliationEngine;
use crate::sales::SalesService;
use crate::workflow::WorkflowService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// The only writer of ledger entries and balance rows.
    pub writer: Arc<LedgerWriter>,

    /// Deduplicates retryable mutating requests.
    pub guard: Arc<IdempotencyGuard>,

    /// Sale checkout and void.
    pub sales: Arc<SalesService>,

    /// Drift detection and repair.
    pub reconciliation: Arc<ReconciliationEngine>,

    /// Stock document workflows.
    pub workflows: Arc<WorkflowService>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let dyn_store: Arc<dyn Store> = store.clone();

        let writer = Arc::new(LedgerWriter::new(
            Arc::clone(&dyn_store),
            config.write_policy(),
            config.retry_policy(),
        ));
        let guard = Arc::new(IdempotencyGuard::new(
            Arc::clone(&dyn_store),
            config.idempotency_stale_after(),
            config.idempotency_retention(),
        ));
        let sales = Arc::new(SalesService::new(
            Arc::clone(&dyn_store),
            Arc::clone(&writer),
            Arc::clone(&guard),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&dyn_store),
            Arc::clone(&writer),
            config.thresholds(),
        ));
        let workflows = Arc::new(WorkflowService::new(
            dyn_store,
            Arc::clone(&writer),
            Arc::clone(&guard),
        ));

        if config.allow_negative_stock {
            tracing::info!("Negative stock allowed; oversold entries are flagged");
        } else {
            tracing::info!("Negative stock refused for outbound movements");
        }

        Self {
            store,
            config,
            writer,
            guard,
            sales,
            reconciliation,
            workflows,
        }
    }
}
