//! Error types for the stock ledger.

use rust_decimal::Decimal;

use crate::ids::IdError;
use crate::ids::StockKey;

/// Result type for stock ledger operations.
pub type Result<T> = std::result::Result<T, StockError>;

/// Errors that can occur in stock ledger operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StockError {
    /// A ledger entry with a zero quantity delta.
    #[error("zero quantity delta rejected for {key}")]
    ZeroDeltaRejected {
        /// The key the entry targeted.
        key: StockKey,
    },

    /// An event type outside the enumerated set.
    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    /// An entry without a reference to its originating business document.
    #[error("missing reference for {key}")]
    MissingReference {
        /// The key the entry targeted.
        key: StockKey,
    },

    /// A reference id too long for the reference index.
    #[error("reference id for {key} is {len} bytes, longer than the index allows")]
    ReferenceTooLong {
        /// The key the entry targeted.
        key: StockKey,
        /// Length of the supplied id in bytes.
        len: usize,
    },

    /// A quantity that leaves the decimal range once applied.
    #[error("quantity out of range for {key}")]
    QuantityOverflow {
        /// The key the entry targeted.
        key: StockKey,
    },

    /// A business event with no entries or no id.
    #[error("empty business event: {0}")]
    EmptyEvent(String),

    /// The delta sign contradicts the event type (e.g. a positive sale).
    #[error("{event_type} requires a {expected} delta, got {delta}")]
    DirectionMismatch {
        /// The event type of the offending entry.
        event_type: String,
        /// `"positive"` or `"negative"`.
        expected: &'static str,
        /// The delta that was supplied.
        delta: Decimal,
    },

    /// An `opening_stock` entry for a key that already has ledger history.
    #[error("opening stock rejected: {key} already has ledger entries")]
    OpeningStockNotFirst {
        /// The key the entry targeted.
        key: StockKey,
    },

    /// The cached quantity moved since the caller observed it.
    #[error("stale balance for {key}: expected {expected}, found {actual}")]
    StaleFinding {
        /// The key the entry targeted.
        key: StockKey,
        /// Quantity the caller based its delta on.
        expected: Decimal,
        /// Quantity found under lock.
        actual: Decimal,
    },

    /// An outbound movement would take stock below zero while the
    /// negative-stock policy is strict.
    #[error("insufficient stock for {key}: available={available}, requested={requested}")]
    InsufficientStock {
        /// The key the entry targeted.
        key: StockKey,
        /// Quantity available before the entry.
        available: Decimal,
        /// Quantity the entry removes.
        requested: Decimal,
    },

    /// Concurrent writers kept the balance rows locked past the retry budget.
    #[error("balance cache write conflict after {attempts} attempts")]
    BalanceCacheWriteConflict {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Another request with the same idempotency key is still being processed.
    #[error("request {key} is already in flight, retry shortly")]
    DuplicateInFlight {
        /// The idempotency key.
        key: String,
    },

    /// The idempotency key belongs to a request that failed.
    #[error("request {key} previously failed: {message}")]
    IdempotencyKeyFailed {
        /// The idempotency key.
        key: String,
        /// The stored failure.
        message: String,
    },

    /// The idempotency key was first used for a different endpoint.
    #[error("idempotency key {key} was issued for {original_endpoint}")]
    IdempotencyKeyReused {
        /// The idempotency key.
        key: String,
        /// Endpoint the key was first used with.
        original_endpoint: String,
    },

    /// A workflow transition that the document's current state does not allow.
    #[error("cannot {action} a {kind} document in status {from}")]
    InvalidTransition {
        /// Document kind.
        kind: String,
        /// Current status.
        from: String,
        /// Attempted action.
        action: String,
    },

    /// Workflow document not found.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Sale has no ledger entries to void.
    #[error("sale not found: {0}")]
    SaleNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl StockError {
    /// Whether the failure is transient and the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BalanceCacheWriteConflict { .. } | Self::DuplicateInFlight { .. }
        )
    }

    /// Whether the failure is a synchronous input validation rejection.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ZeroDeltaRejected { .. }
                | Self::InvalidEventType(_)
                | Self::MissingReference { .. }
                | Self::ReferenceTooLong { .. }
                | Self::QuantityOverflow { .. }
                | Self::EmptyEvent(_)
                | Self::DirectionMismatch { .. }
                | Self::OpeningStockNotFirst { .. }
                | Self::InsufficientStock { .. }
                | Self::InvalidId(_)
        )
    }
}
