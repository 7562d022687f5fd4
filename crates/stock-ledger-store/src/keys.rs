//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.

use chrono::{DateTime, Utc};
use stock_ledger_core::{DocumentId, Reference, StockKey};

/// Length of a ledger key: stock key plus sequence.
pub const LEDGER_KEY_LEN: usize = StockKey::ENCODED_LEN + 8;

/// Create a balance cache key from a stock key.
#[must_use]
pub fn balance_key(key: &StockKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

/// Create a ledger key.
///
/// Format: `variant_id (8 bytes) || location_id (8 bytes) || sequence (8 bytes)`
///
/// All parts are big-endian so entries for a key sort by sequence.
#[must_use]
pub fn ledger_key(key: &StockKey, sequence: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEDGER_KEY_LEN);
    out.extend_from_slice(&key.to_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out
}

/// Create a prefix for iterating all ledger entries of a stock key.
#[must_use]
pub fn ledger_prefix(key: &StockKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

/// Extract the sequence from a ledger key.
#[must_use]
pub fn extract_sequence(ledger_key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = ledger_key
        .get(StockKey::ENCODED_LEN..LEDGER_KEY_LEN)?
        .try_into()
        .ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Create a prefix for iterating all ledger entries written for a reference.
///
/// Format: `reference_tag (1 byte) || id_len (2 bytes) || reference_id`
///
/// The length keeps `sale-1` from matching `sale-10`.
#[must_use]
pub fn reference_prefix(reference: &Reference) -> Vec<u8> {
    let id = reference.reference_id.as_bytes();
    // Entry validation bounds ids to `MAX_REFERENCE_ID_LEN`, so this never saturates.
    let len = u16::try_from(id.len()).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(3 + id.len() + LEDGER_KEY_LEN);
    out.push(reference.reference_type.tag());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(id);
    out
}

/// Create a reference index key.
#[must_use]
pub fn reference_key(reference: &Reference, ledger_key: &[u8]) -> Vec<u8> {
    let mut out = reference_prefix(reference);
    out.extend_from_slice(ledger_key);
    out
}

/// Extract the ledger key from a reference index key.
#[must_use]
pub fn extract_ledger_key_from_reference_key(key: &[u8]) -> Option<&[u8]> {
    key.len()
        .checked_sub(LEDGER_KEY_LEN)
        .map(|start| &key[start..])
}

/// Create a business event key from its id.
#[must_use]
pub fn business_event_key(id: &str) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Create an idempotency record key.
#[must_use]
pub fn idempotency_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create an idempotency creation-time index key.
///
/// Format: `created_at_millis (8 bytes BE) || key`
#[must_use]
pub fn idempotency_created_key(created_at: DateTime<Utc>, key: &str) -> Vec<u8> {
    let mut out = created_millis_prefix(created_at);
    out.extend_from_slice(key.as_bytes());
    out
}

/// Encode a timestamp as the leading 8 bytes of an idempotency index key.
#[must_use]
pub fn created_millis_prefix(at: DateTime<Utc>) -> Vec<u8> {
    let millis = u64::try_from(at.timestamp_millis()).unwrap_or(0);
    millis.to_be_bytes().to_vec()
}

/// Extract the idempotency key from a creation-time index key.
#[must_use]
pub fn extract_idempotency_key(index_key: &[u8]) -> Option<String> {
    index_key
        .get(8..)
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
}

/// Create a document key from a document ID.
#[must_use]
pub fn document_key(id: &DocumentId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_ledger_core::{LocationId, ReferenceType, VariantId};

    fn stock_key(variant: u64, location: u64) -> StockKey {
        StockKey::new(VariantId::new(variant), LocationId::new(location))
    }

    #[test]
    fn ledger_keys_sort_by_sequence() {
        let key = stock_key(7, 1);
        assert!(ledger_key(&key, 2) < ledger_key(&key, 10));
        assert!(ledger_key(&key, 10) < ledger_key(&key, 256));
        assert!(ledger_key(&key, u64::MAX) < ledger_key(&stock_key(7, 2), 0));
    }

    #[test]
    fn ledger_key_format() {
        let key = stock_key(7, 1);
        let encoded = ledger_key(&key, 42);
        assert_eq!(encoded.len(), LEDGER_KEY_LEN);
        assert!(encoded.starts_with(&ledger_prefix(&key)));
        assert_eq!(extract_sequence(&encoded), Some(42));
        assert_eq!(extract_sequence(&encoded[..10]), None);
    }

    #[test]
    fn reference_prefix_does_not_match_longer_ids() {
        let short = Reference::new(ReferenceType::Sale, "sale-1");
        let long = Reference::new(ReferenceType::Sale, "sale-10");
        let indexed = reference_key(&long, &ledger_key(&stock_key(1, 1), 1));
        assert!(!indexed.starts_with(&reference_prefix(&short)));
        assert!(indexed.starts_with(&reference_prefix(&long)));
    }

    #[test]
    fn reference_types_do_not_collide() {
        let sale = Reference::new(ReferenceType::Sale, "42");
        let count = Reference::new(ReferenceType::StockCount, "42");
        assert_ne!(reference_prefix(&sale), reference_prefix(&count));
    }

    #[test]
    fn reference_key_carries_ledger_key() {
        let reference = Reference::new(ReferenceType::Transfer, "doc");
        let lk = ledger_key(&stock_key(3, 4), 9);
        let indexed = reference_key(&reference, &lk);
        assert_eq!(extract_ledger_key_from_reference_key(&indexed), Some(lk.as_slice()));
    }

    #[test]
    fn idempotency_index_orders_by_creation() {
        let early = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let late = DateTime::from_timestamp(1_700_000_100, 0).unwrap_or_default();
        let a = idempotency_created_key(early, "zzz");
        let b = idempotency_created_key(late, "aaa");
        assert!(a < b);
        assert_eq!(extract_idempotency_key(&b).as_deref(), Some("aaa"));
    }
}
