//! Ledger entry types.
//!
//! A ledger entry records one quantity change for one product variant at one
//! location. Entries are written once by the ledger writer and never updated;
//! voids and corrections are new compensating entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StockError};
use crate::ids::{EntryId, LocationId, ProductId, StockKey, VariantId};

/// Longest reference id, in bytes, the reference index can encode.
pub const MAX_REFERENCE_ID_LEN: usize = u16::MAX as usize;

/// Kind of stock-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Goods received against a purchase.
    PurchaseReceipt,
    /// Point-of-sale sale.
    Sale,
    /// Reversal of a sale.
    SaleVoid,
    /// Stock leaving a location on transfer.
    TransferOut,
    /// Stock arriving at a location on transfer.
    TransferIn,
    /// Stock returned to a supplier.
    SupplierReturn,
    /// Stock returned by a customer.
    CustomerReturn,
    /// Manual or reconciliation correction.
    Correction,
    /// Initial stock for a key.
    OpeningStock,
}

/// Sign an event type imposes on its quantity delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Delta must be positive.
    Inbound,
    /// Delta must be negative.
    Outbound,
    /// Either sign is accepted.
    Either,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::PurchaseReceipt,
        Self::Sale,
        Self::SaleVoid,
        Self::TransferOut,
        Self::TransferIn,
        Self::SupplierReturn,
        Self::CustomerReturn,
        Self::Correction,
        Self::OpeningStock,
    ];

    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseReceipt => "purchase_receipt",
            Self::Sale => "sale",
            Self::SaleVoid => "sale_void",
            Self::TransferOut => "transfer_out",
            Self::TransferIn => "transfer_in",
            Self::SupplierReturn => "supplier_return",
            Self::CustomerReturn => "customer_return",
            Self::Correction => "correction",
            Self::OpeningStock => "opening_stock",
        }
    }

    /// Sign rule for this event type.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::PurchaseReceipt | Self::SaleVoid | Self::TransferIn | Self::CustomerReturn => {
                Direction::Inbound
            }
            Self::Sale | Self::TransferOut | Self::SupplierReturn => Direction::Outbound,
            Self::Correction | Self::OpeningStock => Direction::Either,
        }
    }
}

impl FromStr for EventType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StockError::InvalidEventType(s.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of business document that originated an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// Point-of-sale sale.
    Sale,
    /// Purchase receipt document.
    PurchaseReceipt,
    /// Stock transfer document.
    Transfer,
    /// Supplier return document.
    SupplierReturn,
    /// Customer return document.
    CustomerReturn,
    /// Inventory correction document.
    InventoryCorrection,
    /// Physical stock count.
    StockCount,
    /// Reconciliation run repairing the balance cache.
    Reconciliation,
    /// Direct API caller.
    Manual,
}

impl ReferenceType {
    /// Single-byte tag used in the reference index key.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Sale => 1,
            Self::PurchaseReceipt => 2,
            Self::Transfer => 3,
            Self::SupplierReturn => 4,
            Self::CustomerReturn => 5,
            Self::InventoryCorrection => 6,
            Self::StockCount => 7,
            Self::Reconciliation => 8,
            Self::Manual => 9,
        }
    }
}

/// Pointer from an entry to its originating business document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Document type.
    pub reference_type: ReferenceType,
    /// Document id.
    pub reference_id: String,
}

impl Reference {
    /// Create a reference.
    pub fn new(reference_type: ReferenceType, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type,
            reference_id: reference_id.into(),
        }
    }
}

/// One line of a business event, before it is assigned a balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    /// Product the variant belongs to.
    pub product_id: ProductId,
    /// Variant whose stock changes.
    pub variant_id: VariantId,
    /// Location whose stock changes.
    pub location_id: LocationId,
    /// Event type.
    pub event_type: EventType,
    /// Signed quantity change.
    pub quantity_delta: Decimal,
    /// Unit cost, when known.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    /// Selling price, recorded on the balance row in the same commit.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    /// Originating business document.
    pub reference: Reference,
    /// Quantity the caller expects the cache to hold before this entry.
    #[serde(default)]
    pub expected_quantity: Option<Decimal>,
}

impl NewEntry {
    /// The stock key this entry targets.
    #[must_use]
    pub const fn key(&self) -> StockKey {
        StockKey::new(self.variant_id, self.location_id)
    }

    /// Validate the entry in isolation.
    ///
    /// # Errors
    ///
    /// - `StockError::ZeroDeltaRejected` for a zero delta.
    /// - `StockError::MissingReference` for a blank reference id.
    /// - `StockError::ReferenceTooLong` past [`MAX_REFERENCE_ID_LEN`] bytes.
    /// - `StockError::DirectionMismatch` if the sign contradicts the event type.
    pub fn validate(&self) -> Result<()> {
        if self.quantity_delta.is_zero() {
            return Err(StockError::ZeroDeltaRejected { key: self.key() });
        }
        if self.reference.reference_id.trim().is_empty() {
            return Err(StockError::MissingReference { key: self.key() });
        }
        let len = self.reference.reference_id.len();
        if len > MAX_REFERENCE_ID_LEN {
            return Err(StockError::ReferenceTooLong {
                key: self.key(),
                len,
            });
        }
        let expected = match self.event_type.direction() {
            Direction::Inbound if self.quantity_delta.is_sign_negative() => "positive",
            Direction::Outbound if self.quantity_delta.is_sign_positive() => "negative",
            _ => return Ok(()),
        };
        Err(StockError::DirectionMismatch {
            event_type: self.event_type.to_string(),
            expected,
            delta: self.quantity_delta,
        })
    }

    /// Turn the line into a ledger entry chained from `balance_before`.
    ///
    /// # Errors
    ///
    /// `StockError::QuantityOverflow` if the running balance leaves the
    /// decimal range.
    pub fn into_entry(
        self,
        sequence: u64,
        balance_before: Decimal,
        business_event_id: &str,
        created_by: &str,
        created_at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let balance_after = balance_before
            .checked_add(self.quantity_delta)
            .ok_or(StockError::QuantityOverflow { key: self.key() })?;
        Ok(LedgerEntry {
            id: EntryId::generate(),
            sequence,
            product_id: self.product_id,
            variant_id: self.variant_id,
            location_id: self.location_id,
            event_type: self.event_type,
            quantity_delta: self.quantity_delta,
            balance_after,
            reference: self.reference,
            unit_cost: self.unit_cost,
            business_event_id: business_event_id.to_string(),
            negative_balance: balance_after.is_sign_negative() && !balance_after.is_zero(),
            created_at,
            created_by: created_by.to_string(),
        })
    }
}

/// An immutable, balance-carrying ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id (ULID).
    pub id: EntryId,
    /// Position of the entry within its stock key, starting at 1.
    pub sequence: u64,
    /// Product the variant belongs to.
    pub product_id: ProductId,
    /// Variant whose stock changed.
    pub variant_id: VariantId,
    /// Location whose stock changed.
    pub location_id: LocationId,
    /// Event type.
    pub event_type: EventType,
    /// Signed quantity change.
    pub quantity_delta: Decimal,
    /// Running balance for the key immediately after this entry.
    pub balance_after: Decimal,
    /// Originating business document.
    pub reference: Reference,
    /// Unit cost, when known.
    pub unit_cost: Option<Decimal>,
    /// Business event that produced this entry.
    pub business_event_id: String,
    /// Set when the entry left the key with a negative balance (oversold).
    pub negative_balance: bool,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Who wrote the entry.
    pub created_by: String,
}

impl LedgerEntry {
    /// The stock key of this entry.
    #[must_use]
    pub const fn key(&self) -> StockKey {
        StockKey::new(self.variant_id, self.location_id)
    }

    /// The cached balance the writer chained this entry from.
    #[must_use]
    pub fn balance_before(&self) -> Decimal {
        self.balance_after - self.quantity_delta
    }

    /// Whether this entry records a physical stock movement.
    ///
    /// Corrections posted by a reconciliation run only move the balance cache
    /// back to the ledger total; they are excluded from the ledger quantity.
    #[must_use]
    pub fn moves_stock(&self) -> bool {
        !(self.event_type == EventType::Correction
            && self.reference.reference_type == ReferenceType::Reconciliation)
    }
}

/// One logical operation producing one or more entries atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessEvent {
    /// Caller-assigned id; an id is applied at most once.
    pub id: String,
    /// Who triggered the event.
    pub created_by: String,
    /// Lines of the event.
    pub entries: Vec<NewEntry>,
}

impl BusinessEvent {
    /// Create a business event.
    pub fn new(
        id: impl Into<String>,
        created_by: impl Into<String>,
        entries: Vec<NewEntry>,
    ) -> Self {
        Self {
            id: id.into(),
            created_by: created_by.into(),
            entries,
        }
    }

    /// Validate the event and all of its lines.
    ///
    /// # Errors
    ///
    /// `StockError::EmptyEvent` for a blank id or no lines, or the first
    /// line-level validation error.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StockError::EmptyEvent("business event id is blank".into()));
        }
        if self.entries.is_empty() {
            return Err(StockError::EmptyEvent(format!("{} has no entries", self.id)));
        }
        self.entries.iter().try_for_each(NewEntry::validate)
    }
}

/// Final balance of one key after a business event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// The key.
    pub key: StockKey,
    /// Cached quantity after the event.
    pub balance_after: Decimal,
}

/// Outcome of appending a business event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendReceipt {
    /// The business event id.
    pub business_event_id: String,
    /// Ids of the entries written, in line order.
    pub ledger_entry_ids: Vec<EntryId>,
    /// Final balance per touched key, in key order.
    pub new_balances: Vec<BalanceChange>,
    /// Keys the event left with a negative balance.
    #[serde(default)]
    pub negative_keys: Vec<StockKey>,
    /// When the event committed.
    pub committed_at: DateTime<Utc>,
    /// True when the event had already been applied and nothing was written.
    #[serde(default)]
    pub replayed: bool,
}
