//! Idempotency guard integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{key, TestHarness, PRODUCT};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stock_ledger_core::{
    IdempotencyClaim, IdempotencyStatus, LocationId, Reference, ReferenceType, StockError,
    VariantId,
};
use stock_ledger_service::sales::CHECKOUT_ENDPOINT;
use stock_ledger_service::{SaleLine, SaleReceipt, SaleRequest, SalesService, ServiceConfig};
use stock_ledger_store::Store;

fn sale(quantity: Decimal) -> SaleRequest {
    SaleRequest {
        sale_id: None,
        location_id: LocationId::new(1),
        lines: vec![SaleLine {
            product_id: PRODUCT,
            variant_id: VariantId::new(10),
            quantity,
            unit_cost: None,
            unit_price: Some(dec!(4.50)),
        }],
        cashier: "cashier".into(),
    }
}

/// Retry a checkout until it is no longer in flight elsewhere.
async fn checkout_until_settled(
    sales: &SalesService,
    idempotency_key: &str,
    request: SaleRequest,
) -> Result<SaleReceipt, StockError> {
    for _ in 0..500 {
        match sales.checkout(idempotency_key, request.clone()).await {
            Err(StockError::DuplicateInFlight { .. }) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            other => return other,
        }
    }
    panic!("checkout never settled");
}

// ============================================================================
// Exactly-once execution
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_execution() {
    let harness = TestHarness::new();
    let k = key(10, 1);
    harness.open_stock(k, dec!(10)).await;

    let handles = (0..8).map(|_| {
        let sales = Arc::clone(&harness.state.sales);
        tokio::spawn(async move { checkout_until_settled(&sales, "abc", sale(dec!(3))).await })
    });

    let receipts: Vec<SaleReceipt> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();

    assert!(receipts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(harness.quantity(k).await, dec!(7));
    assert_eq!(harness.store.entries_for_key(&k).unwrap().len(), 2);

    let record = harness.store.get_idempotency("abc").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Completed);
}

#[tokio::test]
async fn completed_key_replays_stored_response() {
    let harness = TestHarness::new();
    harness.open_stock(key(10, 1), dec!(10)).await;

    let first = harness.state.sales.checkout("k1", sale(dec!(2))).await.unwrap();
    let second = harness.state.sales.checkout("k1", sale(dec!(2))).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.quantity(key(10, 1)).await, dec!(8));
}

#[tokio::test]
async fn crash_after_commit_is_recovered_on_retry() {
    let harness = TestHarness::with_config(ServiceConfig {
        idempotency_stale_after_seconds: 0,
        ..common::test_config()
    });
    let k = key(10, 1);
    harness.open_stock(k, dec!(10)).await;

    // The first worker claims the key and commits, then dies before
    // completing the record.
    let claim = harness
        .store
        .claim_idempotency("abc", CHECKOUT_ENDPOINT, Utc::now(), chrono::Duration::seconds(60))
        .unwrap();
    assert_eq!(claim, IdempotencyClaim::Acquired { attempt: 1 });
    let committed = harness
        .state
        .sales
        .record_sale("abc", sale(dec!(3)))
        .await
        .unwrap();

    let retried = harness.state.sales.checkout("abc", sale(dec!(3))).await.unwrap();

    assert_eq!(retried.ledger_entry_ids, committed.ledger_entry_ids);
    assert_eq!(harness.quantity(k).await, dec!(7));
    let sold = harness
        .store
        .entries_by_reference(&Reference::new(ReferenceType::Sale, retried.sale_id))
        .unwrap();
    assert_eq!(sold.len(), 1);

    let record = harness.store.get_idempotency("abc").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Completed);
    assert_eq!(record.attempt, 2);
}

#[tokio::test]
async fn live_in_flight_key_is_rejected() {
    let harness = TestHarness::new();
    harness
        .store
        .claim_idempotency("busy", CHECKOUT_ENDPOINT, Utc::now(), chrono::Duration::seconds(60))
        .unwrap();

    let result = harness.state.sales.checkout("busy", sale(dec!(1))).await;

    assert!(matches!(result, Err(StockError::DuplicateInFlight { .. })));
    assert!(harness
        .store
        .entries_for_key(&key(10, 1))
        .unwrap()
        .is_empty());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn invalid_request_spends_the_key() {
    let harness = TestHarness::new();

    let first = harness.state.sales.checkout("bad", sale(dec!(0))).await;
    assert!(matches!(first, Err(StockError::ZeroDeltaRejected { .. })));

    let second = harness.state.sales.checkout("bad", sale(dec!(1))).await;
    assert!(matches!(second, Err(StockError::IdempotencyKeyFailed { .. })));
    assert!(harness
        .store
        .entries_for_key(&key(10, 1))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn insufficient_stock_fails_the_key() {
    let harness = TestHarness::with_config(ServiceConfig {
        allow_negative_stock: false,
        ..common::test_config()
    });
    let k = key(10, 1);
    harness.open_stock(k, dec!(1)).await;

    let first = harness.state.sales.checkout("short", sale(dec!(3))).await;
    assert!(matches!(first, Err(StockError::InsufficientStock { .. })));
    let record = harness.store.get_idempotency("short").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Failed);
    assert!(record.error.unwrap().contains("insufficient stock"));
    assert!(record.response_body.is_none());

    harness
        .state
        .writer
        .append_entries(stock_ledger_core::BusinessEvent::new(
            "restock",
            "clerk",
            vec![common::entry(
                k,
                stock_ledger_core::EventType::PurchaseReceipt,
                dec!(5),
            )],
        ))
        .await
        .unwrap();

    // The failed key stays failed; the client retries under a fresh one.
    let same_key = harness.state.sales.checkout("short", sale(dec!(3))).await;
    assert!(matches!(same_key, Err(StockError::IdempotencyKeyFailed { .. })));
    let fresh = harness
        .state
        .sales
        .checkout("short-2", sale(dec!(3)))
        .await
        .unwrap();
    assert_eq!(fresh.new_balances[0].balance_after, dec!(3));
}

#[tokio::test]
async fn contention_releases_the_key() {
    let harness = TestHarness::new();

    let first = harness
        .state
        .guard
        .with_idempotency("busy", CHECKOUT_ENDPOINT, || async {
            Err::<u32, _>(StockError::BalanceCacheWriteConflict { attempts: 3 })
        })
        .await;
    assert!(matches!(first, Err(StockError::BalanceCacheWriteConflict { .. })));
    assert!(harness.store.get_idempotency("busy").unwrap().is_none());

    let retried = harness
        .state
        .guard
        .with_idempotency("busy", CHECKOUT_ENDPOINT, || async {
            Ok::<_, StockError>(7_u32)
        })
        .await
        .unwrap();
    assert_eq!(retried, 7);
}

#[tokio::test]
async fn key_is_bound_to_its_endpoint() {
    let harness = TestHarness::new();
    harness.open_stock(key(10, 1), dec!(5)).await;
    harness.state.sales.checkout("shared", sale(dec!(1))).await.unwrap();

    let result = harness
        .state
        .guard
        .with_idempotency("shared", "documents.transition", || async {
            Ok::<_, StockError>(1_u32)
        })
        .await;

    assert!(matches!(result, Err(StockError::IdempotencyKeyReused { .. })));
}

#[tokio::test]
async fn stale_claims_are_listed() {
    let harness = TestHarness::with_config(ServiceConfig {
        idempotency_stale_after_seconds: 0,
        ..common::test_config()
    });
    harness
        .store
        .claim_idempotency("stuck", CHECKOUT_ENDPOINT, Utc::now(), chrono::Duration::seconds(60))
        .unwrap();

    let stale = harness.state.guard.stale_in_flight().await.unwrap();

    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].key, "stuck");
}
