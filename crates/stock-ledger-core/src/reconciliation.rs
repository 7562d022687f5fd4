//! Reconciliation types and pure comparison logic.
//!
//! Findings are derived, never authoritative: they are recomputed on demand
//! from ledger entries and balance cache rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::BalanceRow;
use crate::entry::LedgerEntry;
use crate::ids::{EntryId, ProductId, RunId, StockKey};

/// Variance thresholds below which a finding is auto-fixable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Largest absolute variance treated as noise.
    pub absolute: Decimal,
    /// Largest variance, as a percentage of the reference quantity, treated as noise.
    pub relative_percent: Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            absolute: Decimal::new(1, 2),
            relative_percent: Decimal::new(5, 1),
        }
    }
}

impl Thresholds {
    /// Classify a variance against the quantity it was measured from.
    ///
    /// A percentage too large to represent is past any relative threshold.
    #[must_use]
    pub fn classify(&self, variance: Decimal, reference_quantity: Decimal) -> Classification {
        let magnitude = variance.abs();
        if magnitude <= self.absolute {
            return Classification::AutoFixable;
        }
        let percent = magnitude
            .checked_div(reference_quantity.abs())
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED));
        match percent {
            Some(percent) if percent <= self.relative_percent => Classification::AutoFixable,
            _ => Classification::RequiresInvestigation,
        }
    }
}

/// How a finding should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Small enough to correct automatically.
    AutoFixable,
    /// Needs a human.
    RequiresInvestigation,
}

/// What the system quantity is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Ledger fold vs balance cache.
    LedgerVsSystem,
    /// Physical count vs balance cache.
    PhysicalVsSystem,
}

/// One physical count line supplied from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCount {
    /// Counted key.
    pub key: StockKey,
    /// Product the variant belongs to.
    pub product_id: ProductId,
    /// Counted quantity.
    pub counted_quantity: Decimal,
}

/// Everything stored for one key, read from a single consistent view.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyState {
    /// The key.
    pub key: StockKey,
    /// Entries in creation order.
    pub entries: Vec<LedgerEntry>,
    /// Balance cache row, if any.
    pub cached: Option<BalanceRow>,
}

impl KeyState {
    /// Cached quantity, defaulting to zero when the row is absent.
    #[must_use]
    pub fn system_quantity(&self) -> Decimal {
        self.cached
            .as_ref()
            .map_or(Decimal::ZERO, |row| row.quantity_available)
    }

    /// Quantity the ledger proves, see [`ledger_quantity`].
    #[must_use]
    pub fn ledger_quantity(&self) -> Decimal {
        ledger_quantity(&self.entries)
    }

    /// Product id from the cache row or the latest entry.
    #[must_use]
    pub fn product_id(&self) -> Option<ProductId> {
        self.cached
            .as_ref()
            .map(|row| row.product_id)
            .or_else(|| self.entries.last().map(|e| e.product_id))
    }

    /// Most recent known unit cost for the key.
    #[must_use]
    pub fn last_unit_cost(&self) -> Option<Decimal> {
        self.entries.iter().rev().find_map(|e| e.unit_cost)
    }
}

/// Fold entry deltas in creation order.
///
/// Cache-repair corrections are skipped: they record that the cache was moved
/// back to this total, not that stock moved. The fold saturates at the decimal
/// range so a corrupt history is reported rather than aborting a sweep.
#[must_use]
pub fn ledger_quantity(entries: &[LedgerEntry]) -> Decimal {
    entries
        .iter()
        .filter(|e| e.moves_stock())
        .fold(Decimal::ZERO, |acc, e| acc.saturating_add(e.quantity_delta))
}

/// A discrepancy between the balance cache and what it is compared to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The key.
    pub key: StockKey,
    /// Product the variant belongs to.
    pub product_id: ProductId,
    /// Balance cache quantity.
    pub system_quantity: Decimal,
    /// Ledger-recomputed quantity.
    pub ledger_quantity: Decimal,
    /// Counted quantity (physical sweeps only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_quantity: Option<Decimal>,
    /// Signed adjustment the system quantity needs to agree.
    pub variance: Decimal,
    /// Last known unit cost.
    pub unit_cost: Option<Decimal>,
    /// `|variance| × unit_cost` (zero without a cost).
    pub variance_value: Decimal,
    /// Classification.
    pub classification: Classification,
    /// Suggested action for the reader of the report.
    pub suggested_action: String,
}

impl Finding {
    /// Compare the cache against the ledger for one key.
    ///
    /// Returns `None` when they agree.
    #[must_use]
    pub fn ledger_vs_system(state: &KeyState, thresholds: &Thresholds) -> Option<Self> {
        let ledger = state.ledger_quantity();
        let system = state.system_quantity();
        let variance = ledger.saturating_sub(system);
        if variance.is_zero() {
            return None;
        }
        let classification = thresholds.classify(variance, ledger);
        let suggested_action = match classification {
            Classification::AutoFixable => format!(
                "post a reconciliation correction of {variance} to move the cache back to {ledger}"
            ),
            Classification::RequiresInvestigation => format!(
                "review the ledger history for {}: cache holds {system}, ledger proves {ledger}",
                state.key
            ),
        };
        Some(Self::build(
            state,
            system,
            ledger,
            None,
            variance,
            classification,
            suggested_action,
        ))
    }

    /// Compare the cache against a physical count for one key.
    ///
    /// Returns `None` when they agree.
    #[must_use]
    pub fn physical_vs_system(
        state: &KeyState,
        counted: Decimal,
        thresholds: &Thresholds,
    ) -> Option<Self> {
        let system = state.system_quantity();
        let variance = counted.saturating_sub(system);
        if variance.is_zero() {
            return None;
        }
        let classification = thresholds.classify(variance, system);
        let suggested_action = match classification {
            Classification::AutoFixable => {
                format!("post a stock count correction of {variance}")
            }
            Classification::RequiresInvestigation => format!(
                "recount {}: counted {counted}, system holds {system}",
                state.key
            ),
        };
        Some(Self::build(
            state,
            system,
            state.ledger_quantity(),
            Some(counted),
            variance,
            classification,
            suggested_action,
        ))
    }

    fn build(
        state: &KeyState,
        system_quantity: Decimal,
        ledger_quantity: Decimal,
        physical_quantity: Option<Decimal>,
        variance: Decimal,
        classification: Classification,
        suggested_action: String,
    ) -> Self {
        let unit_cost = state.last_unit_cost();
        Self {
            key: state.key,
            product_id: state.product_id().unwrap_or(ProductId::new(0)),
            system_quantity,
            ledger_quantity,
            physical_quantity,
            variance,
            unit_cost,
            variance_value: unit_cost
                .map_or(Decimal::ZERO, |cost| variance.abs().saturating_mul(cost)),
            classification,
            suggested_action,
        }
    }
}

/// Result of a reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Run id; also the reference id of any fixes posted.
    pub run_id: RunId,
    /// What was compared.
    pub mode: SweepMode,
    /// When the sweep started.
    pub started_at: DateTime<Utc>,
    /// Number of keys compared.
    pub keys_checked: usize,
    /// Number of findings.
    pub findings_count: usize,
    /// Sum of `variance_value` across findings.
    pub total_absolute_variance_value: Decimal,
    /// The findings.
    pub findings: Vec<Finding>,
    /// Entries posted by auto-fix.
    pub fixes_applied: Vec<EntryId>,
    /// Auto-fixable findings that were not fixed (stale or failed).
    pub fixes_skipped: usize,
}

/// A ledger entry annotated for drift investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The entry.
    pub entry: LedgerEntry,
    /// Ledger quantity after this entry.
    pub ledger_quantity_after: Decimal,
    /// Cache minus ledger quantity at the moment the entry was written.
    ///
    /// Non-zero marks an entry chained from a drifted cache.
    pub drift_before: Decimal,
}

/// Annotate a key's full history in creation order.
#[must_use]
pub fn annotate_history(entries: Vec<LedgerEntry>) -> Vec<HistoryEntry> {
    let mut running = Decimal::ZERO;
    entries
        .into_iter()
        .map(|entry| {
            let drift_before = entry.balance_before().saturating_sub(running);
            if entry.moves_stock() {
                running = running.saturating_add(entry.quantity_delta);
            }
            HistoryEntry {
                entry,
                ledger_quantity_after: running,
                drift_before,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EventType, NewEntry, Reference, ReferenceType};
    use crate::ids::{LocationId, VariantId};
    use rust_decimal_macros::dec;

    fn key() -> StockKey {
        StockKey::new(VariantId::new(10), LocationId::new(1))
    }

    fn entry(seq: u64, event_type: EventType, delta: Decimal, before: Decimal) -> LedgerEntry {
        NewEntry {
            product_id: ProductId::new(1),
            variant_id: VariantId::new(10),
            location_id: LocationId::new(1),
            event_type,
            quantity_delta: delta,
            unit_cost: Some(dec!(2.50)),
            unit_price: None,
            reference: Reference::new(ReferenceType::Manual, "m"),
            expected_quantity: None,
        }
        .into_entry(seq, before, "e", "u", Utc::now())
        .unwrap()
    }

    fn row(qty: Decimal) -> BalanceRow {
        let mut row = BalanceRow::empty(key(), ProductId::new(1));
        row.quantity_available = qty;
        row
    }

    #[test]
    fn thresholds_absolute_and_relative() {
        let t = Thresholds {
            absolute: dec!(1),
            relative_percent: dec!(1),
        };
        assert_eq!(t.classify(dec!(-1), dec!(5)), Classification::AutoFixable);
        assert_eq!(t.classify(dec!(2), dec!(1000)), Classification::AutoFixable);
        assert_eq!(t.classify(dec!(2), dec!(50)), Classification::RequiresInvestigation);
        assert_eq!(t.classify(dec!(2), dec!(0)), Classification::RequiresInvestigation);
    }

    #[test]
    fn thresholds_survive_extreme_ratios() {
        let t = Thresholds::default();
        let huge = Decimal::from_i128_with_scale(10_i128.pow(28), 0);
        let tiny = Decimal::new(1, 7);
        assert_eq!(t.classify(huge, tiny), Classification::RequiresInvestigation);
        assert_eq!(
            t.classify(Decimal::MAX, Decimal::MAX),
            Classification::RequiresInvestigation
        );
    }

    #[test]
    fn extreme_quantities_produce_a_finding() {
        let state = KeyState {
            key: key(),
            entries: vec![entry(1, EventType::OpeningStock, Decimal::MAX, dec!(0))],
            cached: Some(row(Decimal::MIN)),
        };
        let thresholds = Thresholds::default();
        let finding = Finding::ledger_vs_system(&state, &thresholds).unwrap();
        assert_eq!(finding.variance, Decimal::MAX);
        assert_eq!(finding.variance_value, Decimal::MAX);
        assert_eq!(finding.classification, Classification::RequiresInvestigation);

        let counted = Finding::physical_vs_system(&state, Decimal::MAX, &thresholds).unwrap();
        assert_eq!(counted.variance, Decimal::MAX);
    }

    #[test]
    fn agreeing_key_has_no_finding() {
        let state = KeyState {
            key: key(),
            entries: vec![
                entry(1, EventType::PurchaseReceipt, dec!(50), dec!(0)),
                entry(2, EventType::Sale, dec!(-12), dec!(50)),
            ],
            cached: Some(row(dec!(38))),
        };
        assert_eq!(Finding::ledger_vs_system(&state, &Thresholds::default()), None);
    }

    #[test]
    fn drifted_key_reports_signed_variance_and_value() {
        let state = KeyState {
            key: key(),
            entries: vec![entry(1, EventType::PurchaseReceipt, dec!(50), dec!(0))],
            cached: Some(row(dec!(47))),
        };
        let finding = Finding::ledger_vs_system(&state, &Thresholds::default()).unwrap();
        assert_eq!(finding.variance, dec!(3));
        assert_eq!(finding.variance_value, dec!(7.50));
        assert_eq!(finding.classification, Classification::RequiresInvestigation);
    }

    #[test]
    fn missing_cache_row_counts_as_zero() {
        let state = KeyState {
            key: key(),
            entries: vec![entry(1, EventType::PurchaseReceipt, dec!(4), dec!(0))],
            cached: None,
        };
        assert_eq!(state.system_quantity(), dec!(0));
        let finding = Finding::ledger_vs_system(&state, &Thresholds::default()).unwrap();
        assert_eq!(finding.variance, dec!(4));
    }

    #[test]
    fn physical_variance_is_count_minus_system() {
        let state = KeyState {
            key: key(),
            entries: vec![entry(1, EventType::PurchaseReceipt, dec!(10), dec!(0))],
            cached: Some(row(dec!(10))),
        };
        let finding =
            Finding::physical_vs_system(&state, dec!(9), &Thresholds::default()).unwrap();
        assert_eq!(finding.variance, dec!(-1));
        assert_eq!(finding.physical_quantity, Some(dec!(9)));
        assert!(Finding::physical_vs_system(&state, dec!(10), &Thresholds::default()).is_none());
    }

    #[test]
    fn history_marks_where_drift_began() {
        // Cache was forced from 50 to 45 before the sale was written.
        let history = annotate_history(vec![
            entry(1, EventType::PurchaseReceipt, dec!(50), dec!(0)),
            entry(2, EventType::Sale, dec!(-12), dec!(45)),
        ]);
        assert_eq!(history[0].drift_before, dec!(0));
        assert_eq!(history[1].drift_before, dec!(-5));
        assert_eq!(history[1].ledger_quantity_after, dec!(38));
    }
}
