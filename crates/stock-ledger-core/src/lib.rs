//! Core types for the stock ledger.
//!
//! This crate provides the foundational types shared by the store and the
//! service:
//!
//! - **Identifiers**: `ProductId`, `VariantId`, `LocationId`, `StockKey`, `EntryId`
//! - **Ledger**: `LedgerEntry`, `NewEntry`, `BusinessEvent`, `EventType`, `AppendReceipt`
//! - **Balance cache**: `BalanceRow`
//! - **Idempotency**: `IdempotencyRecord`, `IdempotencyClaim`
//! - **Reconciliation**: `Finding`, `SweepReport`, `Thresholds`, `HistoryEntry`
//! - **Workflows**: `StockDocument`, `DocumentKind`, `DocumentStatus`, `Action`
//!
//! # Quantities
//!
//! Quantities and costs are `rust_decimal::Decimal`. Every stock key
//! `(variant, location)` has its own running balance; nothing is aggregated
//! across locations here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod reconciliation;
pub mod workflow;

pub use balance::BalanceRow;
pub use entry::{
    AppendReceipt, BalanceChange, BusinessEvent, Direction, EventType, LedgerEntry, NewEntry,
    Reference, ReferenceType, MAX_REFERENCE_ID_LEN,
};
pub use error::{Result, StockError};
pub use idempotency::{IdempotencyClaim, IdempotencyRecord, IdempotencyStatus};
pub use ids::{DocumentId, EntryId, IdError, LocationId, ProductId, RunId, StockKey, VariantId};
pub use reconciliation::{
    annotate_history, ledger_quantity, Classification, Finding, HistoryEntry, KeyState,
    PhysicalCount, SweepMode, SweepReport, Thresholds,
};
pub use workflow::{
    Action, DocumentKind, DocumentLine, DocumentStatus, PlannedTransition, StatusChange,
    StockDocument,
};
