//! Reconciliation handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use stock_ledger_core::{LocationId, PhysicalCount, ProductId, StockKey, SweepReport, VariantId};

use crate::error::ApiError;
use crate::state::AppState;

/// Ledger sweep request.
#[derive(Debug, Default, Deserialize)]
pub struct LedgerSweepRequest {
    /// Post cache-repair corrections for auto-fixable findings.
    #[serde(default)]
    pub auto_fix: bool,
}

/// One counted key.
#[derive(Debug, Deserialize)]
pub struct CountRequest {
    /// Product.
    pub product_id: ProductId,
    /// Variant.
    pub variant_id: VariantId,
    /// Location.
    pub location_id: LocationId,
    /// Quantity found on the shelf.
    pub counted_quantity: Decimal,
}

/// Physical sweep request.
#[derive(Debug, Deserialize)]
pub struct PhysicalSweepRequest {
    /// Counted keys.
    pub counts: Vec<CountRequest>,
    /// Post count corrections for auto-fixable findings.
    #[serde(default)]
    pub auto_fix: bool,
}

/// Run a ledger-vs-system sweep over every key.
pub async fn ledger_vs_system(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LedgerSweepRequest>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state.reconciliation.ledger_vs_system(body.auto_fix).await?;
    Ok(Json(report))
}

/// Run a physical-vs-system sweep over the counted keys.
pub async fn physical_vs_system(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PhysicalSweepRequest>,
) -> Result<Json<SweepReport>, ApiError> {
    if body.counts.is_empty() {
        return Err(ApiError::BadRequest("counts must not be empty".into()));
    }

    let counts = body
        .counts
        .into_iter()
        .map(|c| PhysicalCount {
            key: StockKey::new(c.variant_id, c.location_id),
            product_id: c.product_id,
            counted_quantity: c.counted_quantity,
        })
        .collect();

    let report = state
        .reconciliation
        .physical_vs_system(counts, body.auto_fix)
        .await?;
    Ok(Json(report))
}
