//! Balance cache row.
//!
//! The materialized "current quantity available" for one stock key. Only the
//! ledger writer mutates it, in the same atomic unit as the entry it reflects.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{EntryId, ProductId, StockKey};

/// One balance cache row per stock key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRow {
    /// The key this row caches.
    pub key: StockKey,
    /// Product the variant belongs to.
    pub product_id: ProductId,
    /// Current quantity available.
    pub quantity_available: Decimal,
    /// Last selling price (maintained by the sales layer, opaque here).
    #[serde(default)]
    pub last_selling_price: Option<Decimal>,
    /// Entry that last moved this row.
    pub last_entry_id: Option<EntryId>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl BalanceRow {
    /// Create an empty row for a key that has never been touched.
    #[must_use]
    pub fn empty(key: StockKey, product_id: ProductId) -> Self {
        Self {
            key,
            product_id,
            quantity_available: Decimal::ZERO,
            last_selling_price: None,
            last_entry_id: None,
            updated_at: Utc::now(),
        }
    }
}
