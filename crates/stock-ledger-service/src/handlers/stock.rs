//! Stock level handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stock_ledger_core::{EntryId, HistoryEntry, LocationId, StockKey, VariantId};

use crate::error::ApiError;
use crate::state::AppState;

/// Stock level response.
#[derive(Debug, Serialize)]
pub struct StockResponse {
    /// Variant.
    pub variant_id: VariantId,
    /// Location.
    pub location_id: LocationId,
    /// Cached quantity; zero when never touched.
    pub quantity_available: Decimal,
    /// Last selling price, if recorded.
    pub last_selling_price: Option<Decimal>,
    /// Entry that last moved the row.
    pub last_entry_id: Option<EntryId>,
    /// When the row was last written.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Get the cached quantity for a key.
pub async fn get_stock(
    State(state): State<Arc<AppState>>,
    Path((variant_id, location_id)): Path<(u64, u64)>,
) -> Result<Json<StockResponse>, ApiError> {
    let key = StockKey::new(VariantId::new(variant_id), LocationId::new(location_id));
    let row = state.writer.get_balance(key).await?;

    Ok(Json(StockResponse {
        variant_id: key.variant_id,
        location_id: key.location_id,
        quantity_available: row
            .as_ref()
            .map_or(Decimal::ZERO, |r| r.quantity_available),
        last_selling_price: row.as_ref().and_then(|r| r.last_selling_price),
        last_entry_id: row.as_ref().and_then(|r| r.last_entry_id),
        updated_at: row.map(|r| r.updated_at),
    }))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Only entries from the last N days.
    pub window_days: Option<u32>,
}

/// History response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Variant.
    pub variant_id: VariantId,
    /// Location.
    pub location_id: LocationId,
    /// Entries in creation order.
    pub entries: Vec<HistoryEntry>,
}

/// Get a key's annotated ledger history.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path((variant_id, location_id)): Path<(u64, u64)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let key = StockKey::new(VariantId::new(variant_id), LocationId::new(location_id));
    let entries = state
        .reconciliation
        .history(key, query.window_days)
        .await?;

    Ok(Json(HistoryResponse {
        variant_id: key.variant_id,
        location_id: key.location_id,
        entries,
    }))
}
