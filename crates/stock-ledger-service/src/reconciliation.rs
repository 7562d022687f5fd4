//! Reconciliation engine.
//!
//! Compares the balance cache against the ledger (or a physical count) from
//! one store snapshot, classifies each variance and optionally posts
//! corrections through the ledger writer. Drift is reported, never raised.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use stock_ledger_core::{
    annotate_history, BusinessEvent, Classification, EventType, Finding, HistoryEntry, NewEntry,
    PhysicalCount, Reference, ReferenceType, RunId, StockError, StockKey, SweepMode, SweepReport,
    Thresholds,
};
use stock_ledger_store::Store;

use crate::ledger::{blocking, LedgerWriter};

/// Actor recorded on corrections posted by a sweep.
pub const RECONCILER: &str = "reconciler";

/// Finds and repairs drift between the ledger and the balance cache.
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    writer: Arc<LedgerWriter>,
    thresholds: Thresholds,
}

impl ReconciliationEngine {
    /// Create the engine.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, writer: Arc<LedgerWriter>, thresholds: Thresholds) -> Self {
        Self {
            store,
            writer,
            thresholds,
        }
    }

    /// Compare every key's cached quantity with the ledger fold.
    ///
    /// With `auto_fix`, each auto-fixable finding gets one cache-repair
    /// correction that moves the cache back to the ledger's total.
    ///
    /// # Errors
    ///
    /// Storage failures. Drift itself is never an error.
    pub async fn ledger_vs_system(&self, auto_fix: bool) -> Result<SweepReport, StockError> {
        let run_id = RunId::generate();
        let started_at = Utc::now();
        let store = Arc::clone(&self.store);
        let states = blocking(move || store.key_states()).await?;

        let findings: Vec<Finding> = states
            .iter()
            .filter_map(|state| Finding::ledger_vs_system(state, &self.thresholds))
            .collect();

        let mut report = build_report(
            run_id,
            SweepMode::LedgerVsSystem,
            started_at,
            states.len(),
            findings,
        );
        if auto_fix {
            self.apply_fixes(&mut report, ReferenceType::Reconciliation).await?;
        }
        log_report(&report);
        Ok(report)
    }

    /// Compare supplied physical counts with the cached quantities.
    ///
    /// With `auto_fix`, each auto-fixable finding gets a stock-moving
    /// correction referencing the count.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn physical_vs_system(
        &self,
        counts: Vec<PhysicalCount>,
        auto_fix: bool,
    ) -> Result<SweepReport, StockError> {
        let run_id = RunId::generate();
        let started_at = Utc::now();
        let store = Arc::clone(&self.store);
        let keys: Vec<StockKey> = counts.iter().map(|c| c.key).collect();
        let states = blocking(move || store.key_states_for(&keys)).await?;

        let findings: Vec<Finding> = states
            .iter()
            .zip(&counts)
            .filter_map(|(state, count)| {
                let mut finding =
                    Finding::physical_vs_system(state, count.counted_quantity, &self.thresholds)?;
                if state.product_id().is_none() {
                    finding.product_id = count.product_id;
                }
                Some(finding)
            })
            .collect();

        let mut report = build_report(
            run_id,
            SweepMode::PhysicalVsSystem,
            started_at,
            states.len(),
            findings,
        );
        if auto_fix {
            self.apply_fixes(&mut report, ReferenceType::StockCount).await?;
        }
        log_report(&report);
        Ok(report)
    }

    /// A key's ledger entries inside the window, annotated for drift tracing.
    ///
    /// The annotation is computed over the full history so the running ledger
    /// quantity is correct for the first entry inside the window.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn history(
        &self,
        key: StockKey,
        window_days: Option<u32>,
    ) -> Result<Vec<HistoryEntry>, StockError> {
        let store = Arc::clone(&self.store);
        let entries = blocking(move || store.entries_for_key(&key)).await?;
        // A window reaching past the representable calendar covers everything.
        let since = window_days
            .and_then(|days| Duration::try_days(i64::from(days)))
            .and_then(|window| Utc::now().checked_sub_signed(window));

        Ok(annotate_history(entries)
            .into_iter()
            .filter(|h| since.map_or(true, |since| h.entry.created_at >= since))
            .collect())
    }

    async fn apply_fixes(
        &self,
        report: &mut SweepReport,
        reference_type: ReferenceType,
    ) -> Result<(), StockError> {
        for finding in &report.findings {
            if finding.classification != Classification::AutoFixable {
                continue;
            }

            let key = finding.key;
            let correction = NewEntry {
                product_id: finding.product_id,
                variant_id: key.variant_id,
                location_id: key.location_id,
                event_type: EventType::Correction,
                quantity_delta: finding.variance,
                unit_cost: finding.unit_cost,
                unit_price: None,
                reference: Reference::new(reference_type, report.run_id.to_string()),
                expected_quantity: Some(finding.system_quantity),
            };
            let event_id = format!(
                "reconciliation:{}:{}:{}",
                report.run_id, key.variant_id, key.location_id
            );

            match self
                .writer
                .append_entries(BusinessEvent::new(event_id, RECONCILER, vec![correction]))
                .await
            {
                Ok(receipt) => report.fixes_applied.extend(receipt.ledger_entry_ids),
                Err(
                    err @ (StockError::StaleFinding { .. }
                    | StockError::BalanceCacheWriteConflict { .. }),
                ) => {
                    tracing::warn!(%key, error = %err, "Skipping correction");
                    report.fixes_skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn build_report(
    run_id: RunId,
    mode: SweepMode,
    started_at: chrono::DateTime<Utc>,
    keys_checked: usize,
    findings: Vec<Finding>,
) -> SweepReport {
    SweepReport {
        run_id,
        mode,
        started_at,
        keys_checked,
        findings_count: findings.len(),
        total_absolute_variance_value: findings
            .iter()
            .fold(Decimal::ZERO, |acc, f| acc.saturating_add(f.variance_value)),
        findings,
        fixes_applied: Vec::new(),
        fixes_skipped: 0,
    }
}

fn log_report(report: &SweepReport) {
    if report.findings_count == 0 {
        tracing::info!(
            run_id = %report.run_id,
            mode = ?report.mode,
            keys_checked = report.keys_checked,
            "Reconciliation sweep found no drift"
        );
        return;
    }

    for finding in &report.findings {
        tracing::warn!(
            run_id = %report.run_id,
            key = %finding.key,
            system_quantity = %finding.system_quantity,
            ledger_quantity = %finding.ledger_quantity,
            variance = %finding.variance,
            classification = ?finding.classification,
            "Reconciliation finding"
        );
    }
    tracing::info!(
        run_id = %report.run_id,
        mode = ?report.mode,
        keys_checked = report.keys_checked,
        findings = report.findings_count,
        total_absolute_variance_value = %report.total_absolute_variance_value,
        fixes_applied = report.fixes_applied.len(),
        fixes_skipped = report.fixes_skipped,
        "Reconciliation sweep finished"
    );
}
