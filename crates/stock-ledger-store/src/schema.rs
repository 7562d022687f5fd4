//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Ledger entries, keyed by `variant || location || sequence` (big-endian).
    ///
    /// A prefix scan over a stock key yields its entries in creation order.
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by originating document,
    /// keyed by `reference_type || len(reference_id) || reference_id || ledger_key`.
    /// Value is empty (index only).
    pub const LEDGER_BY_REFERENCE: &str = "ledger_by_reference";

    /// Balance cache rows, keyed by `variant || location`.
    pub const BALANCES: &str = "balances";

    /// Applied business events and their receipts, keyed by business event id.
    pub const BUSINESS_EVENTS: &str = "business_events";

    /// Idempotency records, keyed by the client-supplied key.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Index: idempotency keys by creation time, keyed by `created_ms || key`.
    /// Value is empty (index only).
    pub const IDEMPOTENCY_BY_CREATED: &str = "idempotency_by_created";

    /// Workflow documents, keyed by document id (ULID).
    pub const DOCUMENTS: &str = "documents";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::LEDGER,
        cf::LEDGER_BY_REFERENCE,
        cf::BALANCES,
        cf::BUSINESS_EVENTS,
        cf::IDEMPOTENCY,
        cf::IDEMPOTENCY_BY_CREATED,
        cf::DOCUMENTS,
    ]
}
