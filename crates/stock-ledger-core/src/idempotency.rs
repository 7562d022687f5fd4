//! Idempotency records.
//!
//! A record is admitted once per client-supplied key. Its status moves from
//! `processing` to `completed` or `failed` exactly once and never reverts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Status of an idempotent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// A worker holds the key.
    Processing,
    /// The response is stored and will be replayed.
    Completed,
    /// The request failed; the key is spent.
    Failed,
}

/// A stored idempotency record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key.
    pub key: String,
    /// Endpoint the key was issued for.
    pub endpoint: String,
    /// Current status.
    pub status: IdempotencyStatus,
    /// Claim token; bumped each time a stale record is reclaimed.
    pub attempt: u32,
    /// Stored response, once completed.
    #[serde(default)]
    pub response_body: Option<serde_json::Value>,
    /// Stored failure, once failed.
    #[serde(default)]
    pub error: Option<String>,
    /// When the key was first admitted.
    pub created_at: DateTime<Utc>,
    /// When the current attempt claimed the key (or the record was finalized).
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A fresh `processing` record.
    #[must_use]
    pub fn processing(key: &str, endpoint: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            endpoint: endpoint.to_string(),
            status: IdempotencyStatus::Processing,
            attempt: 1,
            response_body: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a `processing` record has outlived the staleness threshold.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == IdempotencyStatus::Processing && now - self.updated_at >= stale_after
    }
}

/// Result of trying to admit a request under an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyClaim {
    /// The key was new; the caller owns attempt 1.
    Acquired {
        /// Claim token to finalize with.
        attempt: u32,
    },
    /// A stale `processing` record was taken over.
    Reclaimed {
        /// Claim token to finalize with.
        attempt: u32,
    },
    /// The request already completed; replay its response.
    Replay(serde_json::Value),
    /// A live worker holds the key.
    InFlight {
        /// When the live attempt claimed the key.
        since: DateTime<Utc>,
    },
    /// The request already failed.
    Failed(String),
    /// The key was issued for another endpoint.
    EndpointMismatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_record_goes_stale() {
        let now = Utc::now();
        let record = IdempotencyRecord::processing("k", "sales.create", now);
        assert!(!record.is_stale(now + Duration::seconds(5), Duration::seconds(30)));
        assert!(record.is_stale(now + Duration::seconds(30), Duration::seconds(30)));
    }

    #[test]
    fn finalized_record_never_goes_stale() {
        let now = Utc::now();
        let mut record = IdempotencyRecord::processing("k", "sales.create", now);
        record.status = IdempotencyStatus::Completed;
        assert!(!record.is_stale(now + Duration::days(1), Duration::seconds(30)));
    }
}
