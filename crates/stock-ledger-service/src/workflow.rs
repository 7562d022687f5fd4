//! Workflow service.
//!
//! Creates stock documents and applies actions to them. The stock-affecting
//! transition commits its ledger event and the status flip together in the
//! store; every action is idempotency-guarded on `(document id, action)`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stock_ledger_core::{
    Action, AppendReceipt, DocumentId, DocumentKind, DocumentLine, LocationId, StockDocument,
    StockError,
};
use stock_ledger_store::Store;

use crate::idempotency::IdempotencyGuard;
use crate::ledger::{blocking, LedgerWriter};

/// Endpoint name document transitions are guarded under.
pub const TRANSITION_ENDPOINT: &str = "documents.transition";

/// A request to open a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    /// Kind of document.
    pub kind: DocumentKind,
    /// Location the document acts on (the source, for transfers).
    pub location_id: LocationId,
    /// Destination of a transfer.
    #[serde(default)]
    pub destination_location_id: Option<LocationId>,
    /// Product lines.
    pub lines: Vec<DocumentLine>,
    /// Author.
    pub created_by: String,
}

/// Result of applying an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The document after the action.
    pub document: StockDocument,
    /// The ledger receipt, for the stock-affecting transition.
    #[serde(default)]
    pub receipt: Option<AppendReceipt>,
}

/// Prefix of the idempotency keys the service derives for document actions.
pub const TRANSITION_KEY_PREFIX: &str = "document:";

/// Idempotency key of a document action.
#[must_use]
pub fn transition_key(id: &DocumentId, action: Action) -> String {
    format!("{TRANSITION_KEY_PREFIX}{id}:{action}")
}

/// Drives stock documents through their state machines.
pub struct WorkflowService {
    store: Arc<dyn Store>,
    writer: Arc<LedgerWriter>,
    guard: Arc<IdempotencyGuard>,
}

impl WorkflowService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        writer: Arc<LedgerWriter>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            store,
            writer,
            guard,
        }
    }

    /// Open a document in its kind's initial status.
    ///
    /// # Errors
    ///
    /// Validation errors for documents without lines, bad quantities or a
    /// transfer without a distinct destination.
    pub async fn create_document(&self, request: NewDocument) -> Result<StockDocument, StockError> {
        let document = StockDocument::new(
            request.kind,
            request.location_id,
            request.destination_location_id,
            request.lines,
            request.created_by,
        )?;

        let store = Arc::clone(&self.store);
        let stored = document.clone();
        blocking(move || store.put_document(&stored)).await?;

        tracing::info!(
            document_id = %document.id,
            kind = %document.kind,
            status = %document.status,
            "Document created"
        );
        Ok(document)
    }

    /// Get a document.
    ///
    /// # Errors
    ///
    /// `StockError::DocumentNotFound` if it doesn't exist.
    pub async fn get_document(&self, id: DocumentId) -> Result<StockDocument, StockError> {
        let store = Arc::clone(&self.store);
        blocking(move || store.get_document(&id))
            .await?
            .ok_or_else(|| StockError::DocumentNotFound(id.to_string()))
    }

    /// Apply an action, at most once per `(document, action)`.
    ///
    /// Retrying the stock-affecting action replays the original outcome. An
    /// action the document's status does not allow yet is refused before its
    /// key is claimed, so it stays available once the document gets there.
    ///
    /// # Errors
    ///
    /// - `StockError::InvalidTransition` if the status does not allow the action.
    /// - `StockError::DocumentNotFound` if the document doesn't exist.
    /// - Guard and ledger writer errors.
    pub async fn transition(
        &self,
        id: DocumentId,
        action: Action,
        actor: &str,
    ) -> Result<TransitionOutcome, StockError> {
        let document = self.get_document(id).await?;
        if let Err(err) = document.plan(action, actor) {
            if !document.history.iter().any(|change| change.action == action) {
                return Err(err);
            }
        }

        let key = transition_key(&id, action);
        self.guard
            .with_idempotency(&key, TRANSITION_ENDPOINT, || self.apply(id, action, actor))
            .await
    }

    async fn apply(
        &self,
        id: DocumentId,
        action: Action,
        actor: &str,
    ) -> Result<TransitionOutcome, StockError> {
        let store = Arc::clone(&self.store);
        let policy = self.writer.policy();
        let owned_actor = actor.to_string();
        let result = self
            .writer
            .retry()
            .run("transition_document", move || {
                store.transition_document(&id, action, &owned_actor, policy)
            })
            .await;

        let (document, receipt) = match result {
            Ok(applied) => applied,
            Err(err @ StockError::InvalidTransition { .. }) => {
                return self.already_applied(id, action).await?.ok_or(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            document_id = %document.id,
            kind = %document.kind,
            %action,
            status = %document.status,
            ledger_entries = receipt.as_ref().map_or(0, |r| r.ledger_entry_ids.len()),
            actor,
            "Document transitioned"
        );
        Ok(TransitionOutcome { document, receipt })
    }

    /// Re-derive the outcome of an action that already committed.
    ///
    /// Covers a worker that committed the transition but crashed before its
    /// idempotency record was completed.
    async fn already_applied(
        &self,
        id: DocumentId,
        action: Action,
    ) -> Result<Option<TransitionOutcome>, StockError> {
        let document = self.get_document(id).await?;
        if !document.history.iter().any(|change| change.action == action) {
            return Ok(None);
        }

        let store = Arc::clone(&self.store);
        let event_id = document.business_event_id(action);
        let receipt = blocking(move || store.get_receipt(&event_id))
            .await?
            .map(|mut receipt| {
                receipt.replayed = true;
                receipt
            });

        tracing::info!(
            document_id = %id,
            %action,
            "Action already committed, returning its outcome"
        );
        Ok(Some(TransitionOutcome { document, receipt }))
    }
}
