//! Stock document handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use stock_ledger_core::{Action, DocumentId, StockDocument};

use crate::error::ApiError;
use crate::state::AppState;
use crate::workflow::{NewDocument, TransitionOutcome};

/// Open a document in `draft`.
pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewDocument>,
) -> Result<Json<StockDocument>, ApiError> {
    let document = state.workflows.create_document(body).await?;
    Ok(Json(document))
}

/// Get a document.
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StockDocument>, ApiError> {
    let id = parse_document_id(&id)?;
    let document = state.workflows.get_document(id).await?;
    Ok(Json(document))
}

/// Transition request.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Who performs the action.
    pub actor: String,
}

/// Apply an action to a document.
pub async fn transition(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let id = parse_document_id(&id)?;
    let action: Action = action.parse().map_err(ApiError::BadRequest)?;

    let outcome = state.workflows.transition(id, action, &body.actor).await?;
    Ok(Json(outcome))
}

fn parse_document_id(raw: &str) -> Result<DocumentId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid document id '{raw}': {e}")))
}
