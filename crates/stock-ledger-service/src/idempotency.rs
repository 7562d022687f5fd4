//! Idempotency guard.
//!
//! Wraps retryable mutating work so that one client-supplied key produces at
//! most one execution. Admission is a single locked insert-or-fetch in the
//! store; there is no check-then-act in this layer.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stock_ledger_core::{IdempotencyClaim, IdempotencyRecord, StockError};
use stock_ledger_store::{Store, StoreError};

use crate::ledger::blocking;

/// Deduplicates mutating requests by idempotency key.
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    stale_after: Duration,
    retention: Duration,
}

impl IdempotencyGuard {
    /// Create a guard.
    ///
    /// `stale_after` is how long a `processing` record may sit before another
    /// caller treats its worker as crashed; `retention` is how long finalized
    /// records are kept.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, stale_after: Duration, retention: Duration) -> Self {
        Self {
            store,
            stale_after,
            retention,
        }
    }

    /// Run `work` at most once for `key`.
    ///
    /// - A completed key replays its stored response without invoking `work`.
    /// - A live in-flight key is rejected with `DuplicateInFlight`.
    /// - A stale in-flight key is reclaimed and `work` runs again; work that
    ///   already committed must detect that itself (business event ids do).
    /// - A failure of `work` marks the key `failed`, except contention and
    ///   storage failures, which release it for a retry under the same key.
    ///
    /// # Errors
    ///
    /// - `StockError::DuplicateInFlight` while another caller holds the key.
    /// - `StockError::IdempotencyKeyFailed` if the key's request already failed.
    /// - `StockError::IdempotencyKeyReused` if the key was issued for another endpoint.
    /// - Whatever `work` returns.
    pub async fn with_idempotency<T, F, Fut>(
        &self,
        key: &str,
        endpoint: &str,
        work: F,
    ) -> Result<T, StockError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StockError>>,
    {
        let attempt = match self.claim(key, endpoint).await? {
            IdempotencyClaim::Acquired { attempt } => attempt,
            IdempotencyClaim::Reclaimed { attempt } => {
                tracing::warn!(
                    idempotency_key = %key,
                    endpoint,
                    attempt,
                    "Re-running request after stale in-flight claim"
                );
                attempt
            }
            IdempotencyClaim::Replay(body) => {
                tracing::debug!(idempotency_key = %key, endpoint, "Replaying stored response");
                return serde_json::from_value(body)
                    .map_err(|e| StockError::Serialization(e.to_string()));
            }
            IdempotencyClaim::InFlight { since } => {
                tracing::debug!(idempotency_key = %key, %since, "Rejecting in-flight duplicate");
                return Err(StockError::DuplicateInFlight {
                    key: key.to_string(),
                });
            }
            IdempotencyClaim::Failed(message) => {
                return Err(StockError::IdempotencyKeyFailed {
                    key: key.to_string(),
                    message,
                });
            }
            IdempotencyClaim::EndpointMismatch(original_endpoint) => {
                return Err(StockError::IdempotencyKeyReused {
                    key: key.to_string(),
                    original_endpoint,
                });
            }
        };

        match work().await {
            Ok(value) => {
                let body = serde_json::to_value(&value)
                    .map_err(|e| StockError::Serialization(e.to_string()))?;
                self.finalize(key, attempt, Outcome::Completed(body)).await?;
                Ok(value)
            }
            Err(err) if releases_key(&err) => {
                self.finalize(key, attempt, Outcome::Released).await?;
                Err(err)
            }
            Err(err) => {
                self.finalize(key, attempt, Outcome::Failed(err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    /// `processing` records older than the staleness threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stale_in_flight(&self) -> Result<Vec<IdempotencyRecord>, StockError> {
        let store = Arc::clone(&self.store);
        let stale_after = self.stale_after;
        blocking(move || store.stale_idempotency(Utc::now(), stale_after)).await
    }

    /// Delete finalized records older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn purge_expired(&self) -> Result<usize, StockError> {
        let store = Arc::clone(&self.store);
        let before = Utc::now() - self.retention;
        let purged = blocking(move || store.purge_idempotency(before)).await?;
        if purged > 0 {
            tracing::info!(purged, %before, "Purged expired idempotency records");
        }
        Ok(purged)
    }

    async fn claim(&self, key: &str, endpoint: &str) -> Result<IdempotencyClaim, StockError> {
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let endpoint = endpoint.to_string();
        let stale_after = self.stale_after;
        blocking(move || store.claim_idempotency(&owned_key, &endpoint, Utc::now(), stale_after))
            .await
            .map_err(|err| match err {
                // The record lock is held by the live worker.
                StockError::BalanceCacheWriteConflict { .. } => StockError::DuplicateInFlight {
                    key: key.to_string(),
                },
                other => other,
            })
    }

    async fn finalize(&self, key: &str, attempt: u32, outcome: Outcome) -> Result<(), StockError> {
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let result = tokio::task::spawn_blocking(move || match outcome {
            Outcome::Completed(body) => store.complete_idempotency(&owned_key, attempt, &body),
            Outcome::Failed(message) => store.fail_idempotency(&owned_key, attempt, &message),
            Outcome::Released => store.release_idempotency(&owned_key, attempt),
        })
        .await
        .map_err(|e| StockError::Storage(format!("storage task failed: {e}")))?;

        match result {
            Ok(()) => Ok(()),
            // A later attempt reclaimed the key; its outcome wins.
            Err(StoreError::StaleClaim { .. }) => {
                tracing::warn!(
                    idempotency_key = %key,
                    attempt,
                    "Idempotency claim was superseded before finalizing"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// How a claimed request ended.
enum Outcome {
    Completed(serde_json::Value),
    Failed(String),
    Released,
}

/// Failures that never reached a decision and may succeed under the same key.
///
/// Every other failure is recorded on the key; a failed key never reverts.
fn releases_key(err: &StockError) -> bool {
    err.is_retryable() || matches!(err, StockError::Storage(_))
}
