//! Common test utilities for stock ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use rust_decimal::Decimal;
use tempfile::TempDir;

use stock_ledger_core::{
    BusinessEvent, EventType, LocationId, NewEntry, ProductId, Reference, ReferenceType,
    StockKey, VariantId,
};
use stock_ledger_service::{create_router, AppState, ServiceConfig};
use stock_ledger_store::RocksStore;

/// Product used by most tests.
pub const PRODUCT: ProductId = ProductId::new(7);

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Service components, for calling operations directly.
    pub state: AppState,
    /// The store behind the service.
    pub store: Arc<RocksStore>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and default rules.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with a custom configuration. `data_dir` is overridden.
    pub fn with_config(mut config: ServiceConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.data_dir = temp_dir.path().to_string_lossy().to_string();

        let store = Arc::new(
            RocksStore::open_with(temp_dir.path(), config.store_options())
                .expect("Failed to open store"),
        );

        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Post opening stock for a key through the writer.
    pub async fn open_stock(&self, key: StockKey, quantity: Decimal) {
        let event = BusinessEvent::new(
            format!("opening:{}:{}", key.variant_id, key.location_id),
            "setup",
            vec![entry(key, EventType::OpeningStock, quantity)],
        );
        self.state
            .writer
            .append_entries(event)
            .await
            .expect("Failed to post opening stock");
    }

    /// Cached quantity for a key.
    pub async fn quantity(&self, key: StockKey) -> Decimal {
        self.state
            .writer
            .get_quantity(key)
            .await
            .expect("Failed to read quantity")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with short timeouts suited to tests.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        lock_timeout_ms: 2_000,
        write_initial_backoff_ms: 5,
        write_max_backoff_ms: 50,
        write_max_retries: 20,
        ..ServiceConfig::default()
    }
}

/// Stock key at variant `variant`, location `location`.
pub fn key(variant: u64, location: u64) -> StockKey {
    StockKey::new(VariantId::new(variant), LocationId::new(location))
}

/// A manual entry for `key` of `PRODUCT`.
pub fn entry(key: StockKey, event_type: EventType, delta: Decimal) -> NewEntry {
    NewEntry {
        product_id: PRODUCT,
        variant_id: key.variant_id,
        location_id: key.location_id,
        event_type,
        quantity_delta: delta,
        unit_cost: None,
        unit_price: None,
        reference: Reference::new(ReferenceType::Manual, "test"),
        expected_quantity: None,
    }
}

/// The `Idempotency-Key` header.
pub fn idempotency_header(key: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("idempotency-key"),
        HeaderValue::from_str(key).expect("valid header value"),
    )
}
