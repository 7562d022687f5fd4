//! Stock document workflows.
//!
//! Each document kind is a finite state machine. Exactly one transition per
//! kind is stock-affecting; planning that transition yields the business event
//! that must commit together with the status flip.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entry::{BusinessEvent, EventType, NewEntry, Reference, ReferenceType};
use crate::error::{Result, StockError};
use crate::ids::{DocumentId, LocationId, ProductId, VariantId};

/// Kind of stock document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Goods received from a supplier.
    PurchaseReceipt,
    /// Stock moved between two locations.
    Transfer,
    /// Stock sent back to a supplier.
    SupplierReturn,
    /// Stock brought back by a customer.
    CustomerReturn,
    /// Manual adjustment after a count or damage.
    InventoryCorrection,
}

impl DocumentKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseReceipt => "purchase_receipt",
            Self::Transfer => "transfer",
            Self::SupplierReturn => "supplier_return",
            Self::CustomerReturn => "customer_return",
            Self::InventoryCorrection => "inventory_correction",
        }
    }

    /// Status a new document starts in.
    #[must_use]
    pub const fn initial_status(&self) -> DocumentStatus {
        match self {
            Self::PurchaseReceipt | Self::Transfer | Self::SupplierReturn => DocumentStatus::Draft,
            Self::CustomerReturn | Self::InventoryCorrection => DocumentStatus::Pending,
        }
    }

    const fn reference_type(self) -> ReferenceType {
        match self {
            Self::PurchaseReceipt => ReferenceType::PurchaseReceipt,
            Self::Transfer => ReferenceType::Transfer,
            Self::SupplierReturn => ReferenceType::SupplierReturn,
            Self::CustomerReturn => ReferenceType::CustomerReturn,
            Self::InventoryCorrection => ReferenceType::InventoryCorrection,
        }
    }

    /// Look up a transition. Returns the target status and whether it moves stock.
    #[must_use]
    pub fn transition(
        &self,
        from: DocumentStatus,
        action: Action,
    ) -> Option<(DocumentStatus, bool)> {
        use Action as A;
        use DocumentStatus as S;

        let step = match (self, from, action) {
            (Self::PurchaseReceipt, S::Draft, A::Check) => (S::Checked, false),
            (Self::PurchaseReceipt, S::Checked, A::Approve) => (S::Approved, true),
            (Self::PurchaseReceipt, S::Draft | S::Checked, A::Reject) => (S::Rejected, false),

            (Self::Transfer, S::Draft, A::Check) => (S::Checked, false),
            (Self::Transfer, S::Checked, A::Send) => (S::Sent, true),
            (Self::Transfer, S::Sent, A::Receive) => (S::Received, false),
            (Self::Transfer, S::Draft | S::Checked, A::Cancel) => (S::Cancelled, false),

            (Self::SupplierReturn, S::Draft, A::Check) => (S::Checked, false),
            (Self::SupplierReturn, S::Checked, A::Approve) => (S::Approved, true),
            (Self::SupplierReturn, S::Approved, A::Complete) => (S::Completed, false),
            (Self::SupplierReturn, S::Draft | S::Checked, A::Reject) => (S::Rejected, false),

            (Self::CustomerReturn, S::Pending, A::Approve) => (S::Approved, true),
            (Self::CustomerReturn, S::Approved, A::Complete) => (S::Completed, false),
            (Self::CustomerReturn, S::Pending, A::Reject) => (S::Rejected, false),

            (Self::InventoryCorrection, S::Pending, A::Check) => (S::Checked, false),
            (Self::InventoryCorrection, S::Checked, A::Approve) => (S::Approved, true),
            (Self::InventoryCorrection, S::Pending | S::Checked, A::Reject) => {
                (S::Rejected, false)
            }

            _ => return None,
        };
        Some(step)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a stock document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Being prepared.
    Draft,
    /// Awaiting review.
    Pending,
    /// Reviewed.
    Checked,
    /// Approved; stock effect applied for receipts, returns and corrections.
    Approved,
    /// Transfer dispatched; stock effect applied.
    Sent,
    /// Transfer arrived.
    Received,
    /// Closed.
    Completed,
    /// Rejected before any stock effect.
    Rejected,
    /// Cancelled before any stock effect.
    Cancelled,
}

impl DocumentStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Checked => "checked",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Review a draft or pending document.
    Check,
    /// Approve a checked document.
    Approve,
    /// Dispatch a transfer.
    Send,
    /// Confirm a transfer arrived.
    Receive,
    /// Close an approved return.
    Complete,
    /// Reject before any stock effect.
    Reject,
    /// Cancel a transfer before dispatch.
    Cancel,
}

impl Action {
    /// All actions.
    pub const ALL: [Self; 7] = [
        Self::Check,
        Self::Approve,
        Self::Send,
        Self::Receive,
        Self::Complete,
        Self::Reject,
        Self::Cancel,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Approve => "approve",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Complete => "complete",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product line on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    /// Product.
    pub product_id: ProductId,
    /// Variant.
    pub variant_id: VariantId,
    /// Quantity; signed for inventory corrections, positive otherwise.
    pub quantity: Decimal,
    /// Unit cost, when known.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before.
    pub from: DocumentStatus,
    /// Status after.
    pub to: DocumentStatus,
    /// Action taken.
    pub action: Action,
    /// Who acted.
    pub actor: String,
    /// When.
    pub at: DateTime<Utc>,
}

/// A stock document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDocument {
    /// Document id.
    pub id: DocumentId,
    /// Kind.
    pub kind: DocumentKind,
    /// Current status.
    pub status: DocumentStatus,
    /// Location the stock effect applies to (source for transfers).
    pub location_id: LocationId,
    /// Destination of a transfer.
    #[serde(default)]
    pub destination_location_id: Option<LocationId>,
    /// Lines.
    pub lines: Vec<DocumentLine>,
    /// Creator.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change time.
    pub updated_at: DateTime<Utc>,
    /// Status changes, oldest first.
    #[serde(default)]
    pub history: Vec<StatusChange>,
}

/// The outcome of planning an action on a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransition {
    /// Status after the action.
    pub to: DocumentStatus,
    /// Ledger effect to commit with the status flip, for the stock-affecting transition.
    pub event: Option<BusinessEvent>,
}

impl StockDocument {
    /// Create a document in its kind's initial status.
    ///
    /// # Errors
    ///
    /// `StockError::EmptyEvent` for a document without lines,
    /// `StockError::ZeroDeltaRejected`/`DirectionMismatch` for bad quantities,
    /// and `StockError::InvalidTransition` for a transfer without a distinct destination.
    pub fn new(
        kind: DocumentKind,
        location_id: LocationId,
        destination_location_id: Option<LocationId>,
        lines: Vec<DocumentLine>,
        created_by: impl Into<String>,
    ) -> Result<Self> {
        let now = Utc::now();
        let doc = Self {
            id: DocumentId::generate(),
            kind,
            status: kind.initial_status(),
            location_id,
            destination_location_id,
            lines,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        };
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(StockError::EmptyEvent(format!("{} document has no lines", self.kind)));
        }
        if self.kind == DocumentKind::Transfer
            && self
                .destination_location_id
                .map_or(true, |dest| dest == self.location_id)
        {
            return Err(StockError::InvalidTransition {
                kind: self.kind.to_string(),
                from: self.status.to_string(),
                action: "create without a distinct destination".into(),
            });
        }
        // Building the effect runs the same per-line checks the ledger writer will.
        BusinessEvent::new(self.id.to_string(), &self.created_by, self.ledger_effect()).validate()
    }

    /// Plan `action`, returning the target status and any ledger effect.
    ///
    /// # Errors
    ///
    /// `StockError::InvalidTransition` if the current status does not allow `action`.
    pub fn plan(&self, action: Action, actor: &str) -> Result<PlannedTransition> {
        let (to, stock_affecting) =
            self.kind
                .transition(self.status, action)
                .ok_or_else(|| StockError::InvalidTransition {
                    kind: self.kind.to_string(),
                    from: self.status.to_string(),
                    action: action.to_string(),
                })?;
        let event = stock_affecting.then(|| {
            BusinessEvent::new(self.business_event_id(action), actor, self.ledger_effect())
        });
        Ok(PlannedTransition { to, event })
    }

    /// Record a planned status change on the document.
    pub fn apply(&mut self, action: Action, to: DocumentStatus, actor: &str, at: DateTime<Utc>) {
        self.history.push(StatusChange {
            from: self.status,
            to,
            action,
            actor: actor.to_string(),
            at,
        });
        self.status = to;
        self.updated_at = at;
    }

    /// Business event id of a transition of this document.
    #[must_use]
    pub fn business_event_id(&self, action: Action) -> String {
        format!("{}:{}:{}", self.kind, self.id, action)
    }

    /// Ledger lines the stock-affecting transition posts.
    #[must_use]
    pub fn ledger_effect(&self) -> Vec<NewEntry> {
        let reference = Reference::new(self.kind.reference_type(), self.id.to_string());
        let line_entry = |line: &DocumentLine,
                          location_id: LocationId,
                          event_type: EventType,
                          quantity_delta: Decimal| NewEntry {
            product_id: line.product_id,
            variant_id: line.variant_id,
            location_id,
            event_type,
            quantity_delta,
            unit_cost: line.unit_cost,
            unit_price: None,
            reference: reference.clone(),
            expected_quantity: None,
        };

        let mut entries = Vec::with_capacity(self.lines.len() * 2);
        for line in &self.lines {
            let q = line.quantity;
            match self.kind {
                DocumentKind::PurchaseReceipt => {
                    entries.push(line_entry(line, self.location_id, EventType::PurchaseReceipt, q));
                }
                DocumentKind::Transfer => {
                    entries.push(line_entry(line, self.location_id, EventType::TransferOut, -q));
                    if let Some(dest) = self.destination_location_id {
                        entries.push(line_entry(line, dest, EventType::TransferIn, q));
                    }
                }
                DocumentKind::SupplierReturn => {
                    entries.push(line_entry(line, self.location_id, EventType::SupplierReturn, -q));
                }
                DocumentKind::CustomerReturn => {
                    entries.push(line_entry(line, self.location_id, EventType::CustomerReturn, q));
                }
                DocumentKind::InventoryCorrection => {
                    entries.push(line_entry(line, self.location_id, EventType::Correction, q));
                }
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lines(qty: Decimal) -> Vec<DocumentLine> {
        vec![DocumentLine {
            product_id: ProductId::new(1),
            variant_id: VariantId::new(10),
            quantity: qty,
            unit_cost: Some(dec!(4)),
        }]
    }

    #[test]
    fn every_kind_has_exactly_one_stock_affecting_transition() {
        let kinds = [
            DocumentKind::PurchaseReceipt,
            DocumentKind::Transfer,
            DocumentKind::SupplierReturn,
            DocumentKind::CustomerReturn,
            DocumentKind::InventoryCorrection,
        ];
        let statuses = [
            DocumentStatus::Draft,
            DocumentStatus::Pending,
            DocumentStatus::Checked,
            DocumentStatus::Approved,
            DocumentStatus::Sent,
            DocumentStatus::Received,
            DocumentStatus::Completed,
            DocumentStatus::Rejected,
            DocumentStatus::Cancelled,
        ];
        for kind in kinds {
            let count = statuses
                .iter()
                .flat_map(|s| Action::ALL.iter().map(move |a| (*s, *a)))
                .filter(|(s, a)| matches!(kind.transition(*s, *a), Some((_, true))))
                .count();
            assert_eq!(count, 1, "{kind}");
        }
    }

    #[test]
    fn transfer_send_posts_both_legs() {
        let mut doc = StockDocument::new(
            DocumentKind::Transfer,
            LocationId::new(1),
            Some(LocationId::new(2)),
            lines(dec!(3)),
            "clerk",
        )
        .unwrap();
        let checked = doc.plan(Action::Check, "clerk").unwrap();
        assert!(checked.event.is_none());
        doc.apply(Action::Check, checked.to, "clerk", Utc::now());

        let sent = doc.plan(Action::Send, "manager").unwrap();
        assert_eq!(sent.to, DocumentStatus::Sent);
        let event = sent.event.unwrap();
        assert_eq!(event.entries.len(), 2);
        assert_eq!(event.entries[0].event_type, EventType::TransferOut);
        assert_eq!(event.entries[0].quantity_delta, dec!(-3));
        assert_eq!(event.entries[1].location_id, LocationId::new(2));
        assert_eq!(event.id, format!("transfer:{}:send", doc.id));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let doc = StockDocument::new(
            DocumentKind::PurchaseReceipt,
            LocationId::new(1),
            None,
            lines(dec!(3)),
            "clerk",
        )
        .unwrap();
        let err = doc.plan(Action::Approve, "manager").unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
    }

    #[test]
    fn transfer_requires_distinct_destination() {
        let err = StockDocument::new(
            DocumentKind::Transfer,
            LocationId::new(1),
            Some(LocationId::new(1)),
            lines(dec!(3)),
            "clerk",
        )
        .unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
    }

    #[test]
    fn negative_receipt_quantity_is_rejected() {
        let err = StockDocument::new(
            DocumentKind::PurchaseReceipt,
            LocationId::new(1),
            None,
            lines(dec!(-3)),
            "clerk",
        )
        .unwrap_err();
        assert!(matches!(err, StockError::DirectionMismatch { .. }));
    }

    #[test]
    fn action_parses_from_path_segment() {
        assert_eq!("send".parse::<Action>().unwrap(), Action::Send);
        assert!("ship".parse::<Action>().is_err());
    }
}
