//! Ledger writer.
//!
//! The only component that appends ledger entries or moves the balance cache.
//! Every business event commits as one atomic unit in the store; this layer
//! validates up front, runs storage work off the async runtime and retries
//! lock conflicts with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use stock_ledger_core::{AppendReceipt, BalanceRow, BusinessEvent, StockError, StockKey};
use stock_ledger_store::{Store, StoreError, WritePolicy};

/// Retry schedule for lock conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Initial backoff (doubles with each attempt).
    pub initial_backoff: Duration,
    /// Maximum backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run a blocking store operation, retrying lock conflicts.
    ///
    /// Returns `StockError::BalanceCacheWriteConflict` once the budget is spent.
    pub async fn run<T, F>(&self, operation: &str, op: F) -> Result<T, StockError>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, StoreError> + Clone + Send + 'static,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match blocking_raw(op.clone()).await? {
                Ok(value) => return Ok(value),
                Err(err) if err.is_conflict() => {
                    if attempt > self.max_retries {
                        tracing::warn!(
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Write conflict persisted after max retries"
                        );
                        return Err(StockError::BalanceCacheWriteConflict { attempts: attempt });
                    }

                    let backoff = self.backoff(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Write conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Run a store call on the blocking pool.
pub(crate) async fn blocking<T, F>(op: F) -> Result<T, StockError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    blocking_raw(op).await?.map_err(StockError::from)
}

async fn blocking_raw<T, F>(op: F) -> Result<Result<T, StoreError>, StockError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StockError::Storage(format!("storage task failed: {e}")))
}

/// Appends business events to the ledger and moves the balance cache with them.
pub struct LedgerWriter {
    store: Arc<dyn Store>,
    policy: WritePolicy,
    retry: RetryPolicy,
}

impl LedgerWriter {
    /// Create a writer over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: WritePolicy, retry: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            retry,
        }
    }

    /// The negative-stock policy this writer enforces.
    #[must_use]
    pub const fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// The retry schedule this writer uses.
    #[must_use]
    pub const fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Append every line of a business event atomically.
    ///
    /// An event id that was already applied returns its original receipt with
    /// `replayed = true`; nothing is written twice.
    ///
    /// # Errors
    ///
    /// - Validation errors (`ZeroDeltaRejected`, `DirectionMismatch`, ...) with no state change.
    /// - `StockError::BalanceCacheWriteConflict` once lock conflicts exhaust the retry budget.
    pub async fn append_entries(&self, event: BusinessEvent) -> Result<AppendReceipt, StockError> {
        event.validate()?;

        tracing::debug!(
            business_event_id = %event.id,
            lines = event.entries.len(),
            created_by = %event.created_by,
            "Appending business event"
        );

        let store = Arc::clone(&self.store);
        let policy = self.policy;
        let event = Arc::new(event);
        let op_event = Arc::clone(&event);
        let receipt = self
            .retry
            .run("append_entries", move || {
                store.append_event(&op_event, policy)
            })
            .await?;

        if receipt.replayed {
            tracing::info!(
                business_event_id = %event.id,
                "Business event already applied, returning original receipt"
            );
        } else {
            tracing::info!(
                business_event_id = %event.id,
                entries = receipt.ledger_entry_ids.len(),
                negative_keys = receipt.negative_keys.len(),
                "Business event committed"
            );
        }

        Ok(receipt)
    }

    /// Current quantity for a key; zero when no stock event ever touched it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_quantity(&self, key: StockKey) -> Result<Decimal, StockError> {
        Ok(self
            .get_balance(key)
            .await?
            .map_or(Decimal::ZERO, |row| row.quantity_available))
    }

    /// The balance cache row for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_balance(&self, key: StockKey) -> Result<Option<BalanceRow>, StockError> {
        let store = Arc::clone(&self.store);
        blocking(move || store.get_balance(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.backoff(4), Duration::from_millis(100));
        assert_eq!(policy.backoff(40), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn run_gives_up_after_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = policy
            .run("test", move || -> Result<(), StoreError> {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(StoreError::Conflict("busy".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(err, StockError::BalanceCacheWriteConflict { attempts: 3 });
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_rejections() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let err = policy
            .run("test", move || -> Result<(), StoreError> {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(StoreError::Rejected(StockError::EmptyEvent("x".into())))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StockError::EmptyEvent(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
