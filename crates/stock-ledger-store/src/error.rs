//! Error types for stock ledger storage.

use rocksdb::ErrorKind;
use stock_ledger_core::StockError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Record id.
        id: String,
    },

    /// A row lock could not be taken within the lock timeout.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// An idempotency claim was superseded by a later attempt or already finalized.
    #[error("stale idempotency claim for {key} (attempt {attempt})")]
    StaleClaim {
        /// The idempotency key.
        key: String,
        /// The attempt that tried to finalize.
        attempt: u32,
    },

    /// A ledger rule rejected the write inside the atomic unit.
    #[error(transparent)]
    Rejected(#[from] StockError),
}

impl StoreError {
    /// Whether retrying the same write may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Self::Conflict(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<StoreError> for StockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(inner) => inner,
            StoreError::Conflict(_) => StockError::BalanceCacheWriteConflict { attempts: 1 },
            StoreError::NotFound { entity: "document", id } => StockError::DocumentNotFound(id),
            StoreError::Serialization(msg) => StockError::Serialization(msg),
            other => StockError::Storage(other.to_string()),
        }
    }
}
