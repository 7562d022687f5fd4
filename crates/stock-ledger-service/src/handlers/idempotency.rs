//! Idempotency maintenance handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use stock_ledger_core::IdempotencyRecord;

use crate::error::ApiError;
use crate::state::AppState;

/// Stale in-flight records.
#[derive(Debug, Serialize)]
pub struct StaleResponse {
    /// Records stuck in `processing` past the staleness threshold.
    pub records: Vec<IdempotencyRecord>,
}

/// List requests that have been in flight longer than the staleness threshold.
pub async fn list_stale(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StaleResponse>, ApiError> {
    let records = state.guard.stale_in_flight().await?;
    Ok(Json(StaleResponse { records }))
}
