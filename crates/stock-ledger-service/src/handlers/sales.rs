//! Sale handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use stock_ledger_core::AppendReceipt;

use crate::error::ApiError;
use crate::handlers::idempotency_key;
use crate::sales::{SaleReceipt, SaleRequest};
use crate::state::AppState;

/// Check out a sale. Requires an `Idempotency-Key` header.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaleRequest>,
) -> Result<Json<SaleReceipt>, ApiError> {
    let key = idempotency_key(&headers)?
        .ok_or_else(|| ApiError::BadRequest("Idempotency-Key header is required".into()))?;

    tracing::debug!(
        idempotency_key = %key,
        location_id = %body.location_id,
        lines = body.lines.len(),
        "Processing checkout"
    );

    let receipt = state.sales.checkout(&key, body).await?;
    Ok(Json(receipt))
}

/// Void request.
#[derive(Debug, Deserialize)]
pub struct VoidRequest {
    /// Who voids the sale.
    pub actor: String,
}

/// Void a sale.
pub async fn void_sale(
    State(state): State<Arc<AppState>>,
    Path(sale_id): Path<String>,
    Json(body): Json<VoidRequest>,
) -> Result<Json<AppendReceipt>, ApiError> {
    let receipt = state.sales.void_sale(&sale_id, &body.actor).await?;
    Ok(Json(receipt))
}
