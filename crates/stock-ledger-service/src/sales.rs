//! Sale checkout and void.
//!
//! Checkout is the main retryable caller of the ledger: it runs under the
//! idempotency guard and derives its business event id from the sale id, so
//! re-running it after a crash replays the committed event instead of
//! posting it again.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stock_ledger_core::{
    AppendReceipt, BalanceChange, BusinessEvent, EntryId, EventType, LocationId, NewEntry,
    ProductId, Reference, ReferenceType, StockError, StockKey, VariantId,
};
use stock_ledger_store::Store;

use crate::idempotency::IdempotencyGuard;
use crate::ledger::{blocking, LedgerWriter};

/// Endpoint name sale checkout is guarded under.
pub const CHECKOUT_ENDPOINT: &str = "sales.create";

/// One sold line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    /// Product.
    pub product_id: ProductId,
    /// Variant sold.
    pub variant_id: VariantId,
    /// Quantity sold (positive).
    pub quantity: Decimal,
    /// Unit cost at the time of sale.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    /// Selling price, recorded on the balance row with the sale itself.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// A checkout request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRequest {
    /// Sale id; derived from the idempotency key when absent.
    #[serde(default)]
    pub sale_id: Option<String>,
    /// Location the sale happens at.
    pub location_id: LocationId,
    /// Lines sold.
    pub lines: Vec<SaleLine>,
    /// Cashier.
    pub cashier: String,
}

/// The stored and replayed result of a checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReceipt {
    /// Sale id.
    pub sale_id: String,
    /// Business event id the ledger effect was posted under.
    pub business_event_id: String,
    /// Ledger entries written.
    pub ledger_entry_ids: Vec<EntryId>,
    /// Balances after the sale.
    pub new_balances: Vec<BalanceChange>,
    /// Keys the sale oversold.
    pub oversold: Vec<StockKey>,
}

impl SaleReceipt {
    fn from_append(sale_id: String, receipt: AppendReceipt) -> Self {
        Self {
            sale_id,
            business_event_id: receipt.business_event_id,
            ledger_entry_ids: receipt.ledger_entry_ids,
            new_balances: receipt.new_balances,
            oversold: receipt.negative_keys,
        }
    }
}

/// Business event id of a sale.
#[must_use]
pub fn sale_event_id(sale_id: &str) -> String {
    format!("sale:{sale_id}")
}

/// Business event id of a sale's void.
#[must_use]
pub fn void_event_id(sale_id: &str) -> String {
    format!("sale:{sale_id}:void")
}

/// Posts sales and their voids through the ledger writer.
pub struct SalesService {
    store: Arc<dyn Store>,
    writer: Arc<LedgerWriter>,
    guard: Arc<IdempotencyGuard>,
}

impl SalesService {
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

    /// Check out a sale exactly once per idempotency key.
    ///
    /// # Errors
    ///
    /// Guard errors (`DuplicateInFlight`, `IdempotencyKeyFailed`, ...) and
    /// ledger writer errors.
    pub async fn checkout(
        &self,
        idempotency_key: &str,
        request: SaleRequest,
    ) -> Result<SaleReceipt, StockError> {
        self.guard
            .with_idempotency(idempotency_key, CHECKOUT_ENDPOINT, || {
                self.record_sale(idempotency_key, request)
            })
            .await
    }

    /// Post a sale's ledger effect.
    ///
    /// This is the work the guard runs. Calling it again for the same sale id
    /// returns the committed receipt.
    ///
    /// # Errors
    ///
    /// `StockError::EmptyEvent` for a sale without lines and ledger writer errors.
    pub async fn record_sale(
        &self,
        idempotency_key: &str,
        request: SaleRequest,
    ) -> Result<SaleReceipt, StockError> {
        let sale_id = request
            .sale_id
            .clone()
            .unwrap_or_else(|| format!("checkout-{idempotency_key}"));
        let reference = Reference::new(ReferenceType::Sale, sale_id.clone());

        let entries = request
            .lines
            .iter()
            .map(|line| NewEntry {
                product_id: line.product_id,
                variant_id: line.variant_id,
                location_id: request.location_id,
                event_type: EventType::Sale,
                quantity_delta: -line.quantity,
                unit_cost: line.unit_cost,
                unit_price: line.unit_price,
                reference: reference.clone(),
                expected_quantity: None,
            })
            .collect();
        let event = BusinessEvent::new(sale_event_id(&sale_id), &request.cashier, entries);

        let receipt = self.writer.append_entries(event).await?;
        Ok(SaleReceipt::from_append(sale_id, receipt))
    }

    /// Void a sale with compensating `sale_void` entries.
    ///
    /// A sale is voided at most once; voiding again returns the original receipt.
    ///
    /// # Errors
    ///
    /// `StockError::SaleNotFound` if no sale entries reference `sale_id`.
    pub async fn void_sale(&self, sale_id: &str, actor: &str) -> Result<AppendReceipt, StockError> {
        let store = Arc::clone(&self.store);
        let reference = Reference::new(ReferenceType::Sale, sale_id);
        let sold = blocking(move || store.entries_by_reference(&reference)).await?;

        let reference = Reference::new(ReferenceType::Sale, sale_id);
        let entries: Vec<NewEntry> = sold
            .iter()
            .filter(|entry| entry.event_type == EventType::Sale)
            .map(|entry| NewEntry {
                product_id: entry.product_id,
                variant_id: entry.variant_id,
                location_id: entry.location_id,
                event_type: EventType::SaleVoid,
                quantity_delta: -entry.quantity_delta,
                unit_cost: entry.unit_cost,
                unit_price: None,
                reference: reference.clone(),
                expected_quantity: None,
            })
            .collect();

        if entries.is_empty() {
            return Err(StockError::SaleNotFound(sale_id.to_string()));
        }

        tracing::debug!(sale_id, lines = entries.len(), "Voiding sale");
        self.writer
            .append_entries(BusinessEvent::new(void_event_id(sale_id), actor, entries))
            .await
    }
}
