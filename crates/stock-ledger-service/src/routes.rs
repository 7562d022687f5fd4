//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{documents, events, health, idempotency, reconciliation, sales, stock};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for ledger-mutating and read endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent reconciliation sweeps. Sweeps read every key.
const RECONCILIATION_MAX_CONCURRENT_REQUESTS: usize = 2;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Ledger
/// - `POST /v1/events` - Append a business event (optional `Idempotency-Key`)
/// - `POST /v1/sales` - Check out a sale (requires `Idempotency-Key`)
/// - `POST /v1/sales/:sale_id/void` - Void a sale
///
/// ## Stock
/// - `GET /v1/stock/:variant_id/:location_id` - Cached quantity
/// - `GET /v1/stock/:variant_id/:location_id/history` - Annotated ledger history
///
/// ## Documents
/// - `POST /v1/documents` - Open a document
/// - `GET /v1/documents/:id` - Get a document
/// - `POST /v1/documents/:id/:action` - Apply an action
///
/// ## Reconciliation (own concurrency limit)
/// - `POST /v1/reconciliation/ledger` - Ledger vs system sweep
/// - `POST /v1/reconciliation/physical` - Physical count vs system sweep
///
/// ## Maintenance
/// - `GET /v1/idempotency/stale` - Stuck in-flight requests
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let reconciliation_routes = Router::new()
        .route("/ledger", post(reconciliation::ledger_vs_system))
        .route("/physical", post(reconciliation::physical_vs_system))
        .layer(ConcurrencyLimitLayer::new(
            RECONCILIATION_MAX_CONCURRENT_REQUESTS,
        ));

    let api_routes = Router::new()
        // Ledger
        .route("/events", post(events::append_event))
        .route("/sales", post(sales::checkout))
        .route("/sales/:sale_id/void", post(sales::void_sale))
        // Stock
        .route("/stock/:variant_id/:location_id", get(stock::get_stock))
        .route(
            "/stock/:variant_id/:location_id/history",
            get(stock::get_history),
        )
        // Documents
        .route("/documents", post(documents::create_document))
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/:action", post(documents::transition))
        // Maintenance
        .route("/idempotency/stale", get(idempotency::list_stale))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/reconciliation", reconciliation_routes);

    Router::new()
        // Health (public, no limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
