//! `RocksDB` storage layer for the stock ledger.
//!
//! This crate persists ledger entries, the balance cache, idempotency records
//! and workflow documents in a pessimistic `RocksDB` `TransactionDB`. Every
//! ledger write takes row locks on the balance rows it touches, appends the
//! entries and moves the cache in one transaction.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `ledger`: Ledger entries, keyed by `variant || location || sequence`
//! - `ledger_by_reference`: Index for listing entries by originating document
//! - `balances`: Balance cache rows, keyed by `variant || location`
//! - `business_events`: Applied business events and their receipts
//! - `idempotency`: Idempotency records, keyed by client key
//! - `idempotency_by_created`: Index for sweeping idempotency records by age
//! - `documents`: Workflow documents, keyed by document id (ULID)
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use stock_ledger_core::{
//!     BusinessEvent, EventType, LocationId, NewEntry, ProductId, Reference, ReferenceType,
//!     StockKey, VariantId,
//! };
//! use stock_ledger_store::{RocksStore, Store, WritePolicy};
//!
//! let store = RocksStore::open("/tmp/stock-ledger-db").unwrap();
//!
//! let entry = NewEntry {
//!     product_id: ProductId::new(1),
//!     variant_id: VariantId::new(7),
//!     location_id: LocationId::new(1),
//!     event_type: EventType::OpeningStock,
//!     quantity_delta: Decimal::from(10),
//!     unit_cost: None,
//!     unit_price: None,
//!     reference: Reference::new(ReferenceType::Manual, "opening"),
//!     expected_quantity: None,
//! };
//! let event = BusinessEvent::new("opening:7:1", "importer", vec![entry]);
//! store.append_event(&event, WritePolicy::default()).unwrap();
//!
//! let row = store
//!     .get_balance(&StockKey::new(VariantId::new(7), LocationId::new(1)))
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::{RocksStore, StoreOptions};

use chrono::{DateTime, Duration, Utc};
use stock_ledger_core::{
    Action, AppendReceipt, BalanceRow, BusinessEvent, DocumentId, IdempotencyClaim,
    IdempotencyRecord, KeyState, LedgerEntry, Reference, StockDocument, StockKey,
};

/// Rules the writer enforces inside the atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Whether outbound entries may take a balance below zero.
    ///
    /// When allowed, the entry is flagged `negative_balance` instead.
    pub allow_negative_stock: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            allow_negative_stock: true,
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append every line of a business event and move the balance cache, atomically.
    ///
    /// Row locks on all touched balance rows are taken in key order. If the
    /// business event id was already applied, its original receipt is returned
    /// with `replayed = true` and nothing is written.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected` if a ledger rule refuses a line; nothing is written.
    /// - `StoreError::Conflict` if a row lock could not be taken in time.
    fn append_event(&self, event: &BusinessEvent, policy: WritePolicy) -> Result<AppendReceipt>;

    /// Get the receipt of an applied business event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_receipt(&self, business_event_id: &str) -> Result<Option<AppendReceipt>>;

    /// List ledger entries for a stock key in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn entries_for_key(&self, key: &StockKey) -> Result<Vec<LedgerEntry>>;

    /// List ledger entries written for a reference, in key then creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn entries_by_reference(&self, reference: &Reference) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Balance Cache Operations
    // =========================================================================

    /// Get the balance cache row for a stock key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, key: &StockKey) -> Result<Option<BalanceRow>>;

    // =========================================================================
    // Reconciliation Reads
    // =========================================================================

    /// Read every stock key that has ledger entries or a cache row, from one
    /// consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn key_states(&self) -> Result<Vec<KeyState>>;

    /// Read the given stock keys from one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn key_states_for(&self, keys: &[StockKey]) -> Result<Vec<KeyState>>;

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    /// Admit a request under an idempotency key.
    ///
    /// At most one caller holds a live `processing` record for a key. A
    /// `processing` record older than `stale_after` is reclaimed with a new
    /// attempt number.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the record lock could not be taken in time.
    fn claim_idempotency(
        &self,
        key: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<IdempotencyClaim>;

    /// Store the response of a completed request.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StaleClaim` if `attempt` no longer owns the key.
    fn complete_idempotency(
        &self,
        key: &str,
        attempt: u32,
        response: &serde_json::Value,
    ) -> Result<()>;

    /// Store the failure of a request.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StaleClaim` if `attempt` no longer owns the key.
    fn fail_idempotency(&self, key: &str, attempt: u32, error: &str) -> Result<()>;

    /// Drop a `processing` record owned by `attempt` so the key can be retried.
    ///
    /// Used when the work failed transiently and a retry under the same key may succeed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StaleClaim` if `attempt` no longer owns the key.
    fn release_idempotency(&self, key: &str, attempt: u32) -> Result<()>;

    /// Get an idempotency record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// List `processing` records older than `stale_after`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn stale_idempotency(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<IdempotencyRecord>>;

    /// Delete finalized records created before `before`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn purge_idempotency(&self, before: DateTime<Utc>) -> Result<usize>;

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Insert a new workflow document.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_document(&self, document: &StockDocument) -> Result<()>;

    /// Get a workflow document by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_document(&self, id: &DocumentId) -> Result<Option<StockDocument>>;

    /// Apply an action to a document.
    ///
    /// The status flip and, for the stock-affecting transition, the ledger
    /// effect commit in the same transaction.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the document doesn't exist.
    /// - `StoreError::Rejected` if the action is not allowed or a ledger rule refuses a line.
    fn transition_document(
        &self,
        id: &DocumentId,
        action: Action,
        actor: &str,
        policy: WritePolicy,
    ) -> Result<(StockDocument, Option<AppendReceipt>)>;
}
