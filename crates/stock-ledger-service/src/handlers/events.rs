//! Business event handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use stock_ledger_core::{
    AppendReceipt, BusinessEvent, EventType, LocationId, NewEntry, ProductId, Reference,
    ReferenceType, StockError, VariantId,
};

use crate::error::ApiError;
use crate::handlers::idempotency_key;
use crate::state::AppState;

/// Endpoint name direct appends are guarded under.
pub const APPEND_ENDPOINT: &str = "events.append";

/// One line of an append request.
#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    /// Product.
    pub product_id: ProductId,
    /// Variant.
    pub variant_id: VariantId,
    /// Location.
    pub location_id: LocationId,
    /// Event type wire name.
    pub event_type: String,
    /// Signed quantity change.
    pub quantity_delta: Decimal,
    /// Unit cost, when known.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    /// Originating document type.
    pub reference_type: ReferenceType,
    /// Originating document id.
    pub reference_id: String,
}

/// Append request.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// Business event id; an id is applied at most once.
    pub business_event_id: String,
    /// Who triggered the event.
    pub created_by: String,
    /// Lines of the event.
    pub entries: Vec<EntryRequest>,
}

/// Append a business event.
pub async fn append_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AppendRequest>,
) -> Result<Json<AppendReceipt>, ApiError> {
    let entries = body
        .entries
        .into_iter()
        .map(|line| -> Result<NewEntry, StockError> {
            Ok(NewEntry {
                product_id: line.product_id,
                variant_id: line.variant_id,
                location_id: line.location_id,
                event_type: line.event_type.parse::<EventType>()?,
                quantity_delta: line.quantity_delta,
                unit_cost: line.unit_cost,
                unit_price: None,
                reference: Reference::new(line.reference_type, line.reference_id),
                expected_quantity: None,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let event = BusinessEvent::new(body.business_event_id, body.created_by, entries);

    let receipt = match idempotency_key(&headers)? {
        Some(key) => {
            state
                .guard
                .with_idempotency(&key, APPEND_ENDPOINT, || state.writer.append_entries(event))
                .await?
        }
        None => state.writer.append_entries(event).await?,
    };

    Ok(Json(receipt))
}
