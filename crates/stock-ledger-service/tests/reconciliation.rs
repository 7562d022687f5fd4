//! Reconciliation engine integration tests.

mod common;

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{entry, key, TestHarness, PRODUCT};
use rust_decimal_macros::dec;
use stock_ledger_core::{
    BusinessEvent, Classification, EventType, PhysicalCount, ReferenceType, SweepMode,
};
use stock_ledger_service::ServiceConfig;
use stock_ledger_store::Store;

async fn receive_and_sell(harness: &TestHarness) {
    let k = key(10, 1);
    harness
        .state
        .writer
        .append_entries(BusinessEvent::new(
            "po-1",
            "clerk",
            vec![entry(k, EventType::PurchaseReceipt, dec!(50))],
        ))
        .await
        .unwrap();
    harness
        .state
        .writer
        .append_entries(BusinessEvent::new(
            "sale-1",
            "cashier",
            vec![entry(k, EventType::Sale, dec!(-12))],
        ))
        .await
        .unwrap();
}

// ============================================================================
// Ledger vs system
// ============================================================================

#[tokio::test]
async fn consistent_store_has_no_findings() {
    let harness = TestHarness::new();
    receive_and_sell(&harness).await;

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(false)
        .await
        .unwrap();

    assert_eq!(report.mode, SweepMode::LedgerVsSystem);
    assert_eq!(report.keys_checked, 1);
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn small_drift_is_detected_and_fixed() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    receive_and_sell(&harness).await;
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(37.9))
        .unwrap();
    let history_before = harness.store.entries_for_key(&k).unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();

    assert_eq!(report.findings_count, 1);
    let finding = &report.findings[0];
    assert_eq!(finding.key, k);
    assert_eq!(finding.system_quantity, dec!(37.9));
    assert_eq!(finding.ledger_quantity, dec!(38));
    assert_eq!(finding.variance, dec!(0.1));
    assert_eq!(finding.classification, Classification::AutoFixable);
    assert_eq!(report.fixes_applied.len(), 1);
    assert_eq!(harness.quantity(k).await, dec!(38));

    // The fix is appended; earlier entries are untouched.
    let history_after = harness.store.entries_for_key(&k).unwrap();
    assert_eq!(history_after.len(), history_before.len() + 1);
    assert_eq!(&history_after[..history_before.len()], &history_before[..]);
    let fix = history_after.last().unwrap();
    assert_eq!(fix.event_type, EventType::Correction);
    assert_eq!(fix.reference.reference_type, ReferenceType::Reconciliation);

    // A second sweep finds nothing left to fix.
    let again = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();
    assert!(again.findings.is_empty());
    assert!(again.fixes_applied.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fix_blocked_by_a_live_writer_is_skipped() {
    let harness = TestHarness::with_config(ServiceConfig {
        lock_timeout_ms: 50,
        write_max_retries: 1,
        ..common::test_config()
    });
    let k = key(10, 1);
    receive_and_sell(&harness).await;
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(37.9))
        .unwrap();

    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let store = Arc::clone(&harness.store);
    let writer = thread::spawn(move || {
        store.hold_balance_row(&k, None, || {
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    });
    locked_rx.recv().unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();
    release_tx.send(()).unwrap();
    writer.join().unwrap().unwrap();

    assert_eq!(report.findings_count, 1);
    assert!(report.fixes_applied.is_empty());
    assert_eq!(report.fixes_skipped, 1);
    assert_eq!(harness.quantity(k).await, dec!(37.9));

    // Once the writer is gone the next sweep repairs the row.
    let again = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();
    assert_eq!(again.fixes_applied.len(), 1);
    assert_eq!(harness.quantity(k).await, dec!(38));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fix_for_a_moved_cache_row_is_skipped() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    receive_and_sell(&harness).await;
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(37.9))
        .unwrap();

    // A writer holds the row through the sweep's snapshot and commits a new
    // quantity before the correction gets the lock.
    let (locked_tx, locked_rx) = mpsc::channel();
    let store = Arc::clone(&harness.store);
    let writer = thread::spawn(move || {
        store.hold_balance_row(&k, Some(dec!(37.95)), || {
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(500));
        })
    });
    locked_rx.recv().unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();
    writer.join().unwrap().unwrap();

    assert_eq!(report.findings_count, 1);
    assert_eq!(report.findings[0].system_quantity, dec!(37.9));
    assert!(report.fixes_applied.is_empty());
    assert_eq!(report.fixes_skipped, 1);
    assert_eq!(harness.quantity(k).await, dec!(37.95));
}

#[tokio::test]
async fn large_drift_requires_investigation() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    receive_and_sell(&harness).await;
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(20))
        .unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(true)
        .await
        .unwrap();

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].variance, dec!(18));
    assert_eq!(
        report.findings[0].classification,
        Classification::RequiresInvestigation
    );
    assert!(report.fixes_applied.is_empty());
    assert_eq!(harness.quantity(k).await, dec!(20));
}

#[tokio::test]
async fn orphan_cache_row_is_reported() {
    let harness = TestHarness::new();
    let orphan = key(77, 3);
    harness
        .store
        .overwrite_cached_quantity(&orphan, PRODUCT, dec!(5))
        .unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(false)
        .await
        .unwrap();

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].key, orphan);
    assert_eq!(report.findings[0].ledger_quantity, dec!(0));
    assert_eq!(report.findings[0].variance, dec!(-5));
}

#[tokio::test]
async fn variance_value_uses_last_unit_cost() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    let mut receipt = entry(k, EventType::PurchaseReceipt, dec!(10));
    receipt.unit_cost = Some(dec!(2.50));
    harness
        .state
        .writer
        .append_entries(BusinessEvent::new("po-cost", "clerk", vec![receipt]))
        .await
        .unwrap();
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(6))
        .unwrap();

    let report = harness
        .state
        .reconciliation
        .ledger_vs_system(false)
        .await
        .unwrap();

    assert_eq!(report.findings[0].variance_value, dec!(10));
    assert_eq!(report.total_absolute_variance_value, dec!(10));
}

// ============================================================================
// Physical vs system
// ============================================================================

#[tokio::test]
async fn physical_count_correction_moves_stock() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    receive_and_sell(&harness).await;

    let report = harness
        .state
        .reconciliation
        .physical_vs_system(
            vec![PhysicalCount {
                key: k,
                product_id: PRODUCT,
                counted_quantity: dec!(37.9),
            }],
            true,
        )
        .await
        .unwrap();

    assert_eq!(report.mode, SweepMode::PhysicalVsSystem);
    assert_eq!(report.findings[0].physical_quantity, Some(dec!(37.9)));
    assert_eq!(report.findings[0].variance, dec!(-0.1));
    assert_eq!(report.fixes_applied.len(), 1);
    assert_eq!(harness.quantity(k).await, dec!(37.9));

    let fix = harness.store.entries_for_key(&k).unwrap().pop().unwrap();
    assert_eq!(fix.reference.reference_type, ReferenceType::StockCount);

    // A count correction is real stock movement, so ledger and cache agree.
    let ledger = harness
        .state
        .reconciliation
        .ledger_vs_system(false)
        .await
        .unwrap();
    assert!(ledger.findings.is_empty());
}

#[tokio::test]
async fn uncounted_key_with_no_history_uses_count_product() {
    let harness = TestHarness::new();
    let k = key(55, 2);

    let report = harness
        .state
        .reconciliation
        .physical_vs_system(
            vec![PhysicalCount {
                key: k,
                product_id: PRODUCT,
                counted_quantity: dec!(4),
            }],
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.findings[0].product_id, PRODUCT);
    assert_eq!(report.findings[0].variance, dec!(4));
    assert!(report.fixes_applied.is_empty());
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn history_marks_entries_written_over_drift() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    receive_and_sell(&harness).await;
    harness
        .store
        .overwrite_cached_quantity(&k, PRODUCT, dec!(37.9))
        .unwrap();
    harness
        .state
        .writer
        .append_entries(BusinessEvent::new(
            "sale-2",
            "cashier",
            vec![entry(k, EventType::Sale, dec!(-1))],
        ))
        .await
        .unwrap();

    let history = harness.state.reconciliation.history(k, None).await.unwrap();

    assert_eq!(history.len(), 3);
    assert_eq!(history[0].drift_before, dec!(0));
    assert_eq!(history[1].drift_before, dec!(0));
    assert_eq!(history[2].drift_before, dec!(-0.1));
    assert_eq!(history[2].ledger_quantity_after, dec!(37));

    let recent = harness
        .state
        .reconciliation
        .history(k, Some(1))
        .await
        .unwrap();
    assert_eq!(recent.len(), 3);
}
