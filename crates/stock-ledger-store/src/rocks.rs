//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Writes go through pessimistic transactions: `get_for_update_cf` takes a row
//! lock that is held until commit, so two writers touching the same balance
//! row serialize on it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    SnapshotWithThreadMode, Transaction, TransactionDB, TransactionDBOptions,
};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use stock_ledger_core::{
    Action, AppendReceipt, BalanceChange, BalanceRow, BusinessEvent, DocumentId, EventType,
    IdempotencyClaim, IdempotencyRecord, IdempotencyStatus, KeyState, LedgerEntry, NewEntry,
    Reference, ReferenceType, StockDocument, StockError, StockKey,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{Store, WritePolicy};

type Db = TransactionDB<MultiThreaded>;
type Txn<'db> = Transaction<'db, Db>;
type Snapshot<'db> = SnapshotWithThreadMode<'db, Db>;

/// Tuning for the `RocksDB` transaction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a writer waits for a row lock before giving up with a conflict.
    pub lock_timeout: StdDuration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: StdDuration::from_secs(10),
        }
    }
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

/// Per-key write state while an event is being appended.
struct Cursor {
    row: BalanceRow,
    next_sequence: u64,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open or create a database with explicit transaction options.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let lock_timeout_ms = i64::try_from(options.lock_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms);
        txn_opts.set_default_lock_timeout(lock_timeout_ms);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    // =========================================================================
    // Ledger Append
    // =========================================================================

    /// Highest sequence written for a key, or 0 for a key with no entries.
    ///
    /// Read from the ledger tail, never from the cache row, so a dropped or
    /// drifted cache row cannot cause a sequence to be reused.
    fn last_sequence(
        txn: &Txn<'_>,
        cf_ledger: &Arc<BoundColumnFamily<'_>>,
        key: &StockKey,
    ) -> Result<u64> {
        let prefix = keys::ledger_prefix(key);
        let upper = keys::ledger_key(key, u64::MAX);
        let mut iter = txn.iterator_cf(
            cf_ledger,
            IteratorMode::From(upper.as_slice(), Direction::Reverse),
        );

        match iter.next() {
            Some(item) => {
                let (k, _) = item?;
                if k.starts_with(&prefix) {
                    Ok(keys::extract_sequence(&k).unwrap_or(0))
                } else {
                    Ok(0)
                }
            }
            None => Ok(0),
        }
    }

    /// Ledger rules that depend on the locked row.
    fn check_line(
        line: &NewEntry,
        cursor: &Cursor,
        policy: WritePolicy,
    ) -> std::result::Result<(), StockError> {
        let key = line.key();
        let available = cursor.row.quantity_available;

        if line.event_type == EventType::OpeningStock && cursor.next_sequence > 1 {
            return Err(StockError::OpeningStockNotFirst { key });
        }

        if let Some(expected) = line.expected_quantity {
            if expected != available {
                return Err(StockError::StaleFinding {
                    key,
                    expected,
                    actual: available,
                });
            }
        }

        let repairs_cache = line.reference.reference_type == ReferenceType::Reconciliation;
        if !policy.allow_negative_stock
            && !repairs_cache
            && line.quantity_delta.is_sign_negative()
            && -line.quantity_delta > available
        {
            return Err(StockError::InsufficientStock {
                key,
                available,
                requested: -line.quantity_delta,
            });
        }

        Ok(())
    }

    /// Append a business event inside an open transaction. The caller commits.
    fn append_in_txn(
        &self,
        txn: &Txn<'_>,
        event: &BusinessEvent,
        policy: WritePolicy,
        now: DateTime<Utc>,
    ) -> Result<AppendReceipt> {
        event.validate()?;

        let cf_events = self.cf(cf::BUSINESS_EVENTS)?;
        let event_key = keys::business_event_key(&event.id);
        if let Some(data) = txn.get_for_update_cf(&cf_events, &event_key, true)? {
            let mut receipt: AppendReceipt = Self::deserialize(&data)?;
            receipt.replayed = true;
            debug!(business_event_id = %event.id, "Business event already applied");
            return Ok(receipt);
        }

        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_by_ref = self.cf(cf::LEDGER_BY_REFERENCE)?;
        let cf_balances = self.cf(cf::BALANCES)?;

        // Lock every touched balance row in key order so that two multi-key
        // events never wait on each other in a cycle.
        let mut touched = BTreeMap::new();
        for line in &event.entries {
            touched.entry(line.key()).or_insert(line.product_id);
        }

        let mut cursors = BTreeMap::new();
        for (key, product_id) in touched {
            let row = match txn.get_for_update_cf(&cf_balances, keys::balance_key(&key), true)? {
                Some(data) => Self::deserialize(&data)?,
                None => BalanceRow::empty(key, product_id),
            };
            let next_sequence = Self::last_sequence(txn, &cf_ledger, &key)? + 1;
            cursors.insert(key, Cursor { row, next_sequence });
        }

        let mut ledger_entry_ids = Vec::with_capacity(event.entries.len());
        for line in &event.entries {
            let key = line.key();
            let cursor = cursors
                .get_mut(&key)
                .ok_or_else(|| StoreError::Database(format!("no lock held for {key}")))?;
            Self::check_line(line, cursor, policy)?;

            let entry = line.clone().into_entry(
                cursor.next_sequence,
                cursor.row.quantity_available,
                &event.id,
                &event.created_by,
                now,
            )?;
            let ledger_key = keys::ledger_key(&key, entry.sequence);
            txn.put_cf(&cf_ledger, &ledger_key, Self::serialize(&entry)?)?;
            txn.put_cf(&cf_by_ref, keys::reference_key(&entry.reference, &ledger_key), b"")?;

            if entry.negative_balance {
                warn!(
                    %key,
                    entry_id = %entry.id,
                    event_type = %entry.event_type,
                    balance_after = %entry.balance_after,
                    "Ledger entry leaves a negative balance"
                );
            }

            cursor.row.quantity_available = entry.balance_after;
            if line.unit_price.is_some() {
                cursor.row.last_selling_price = line.unit_price;
            }
            cursor.row.last_entry_id = Some(entry.id);
            cursor.row.updated_at = now;
            cursor.next_sequence += 1;
            ledger_entry_ids.push(entry.id);
        }

        let mut new_balances = Vec::with_capacity(cursors.len());
        let mut negative_keys = Vec::new();
        for (key, cursor) in &cursors {
            txn.put_cf(&cf_balances, keys::balance_key(key), Self::serialize(&cursor.row)?)?;
            let balance_after = cursor.row.quantity_available;
            if balance_after < Decimal::ZERO {
                negative_keys.push(*key);
            }
            new_balances.push(BalanceChange {
                key: *key,
                balance_after,
            });
        }

        let receipt = AppendReceipt {
            business_event_id: event.id.clone(),
            ledger_entry_ids,
            new_balances,
            negative_keys,
            committed_at: now,
            replayed: false,
        };
        txn.put_cf(&cf_events, &event_key, Self::serialize(&receipt)?)?;

        Ok(receipt)
    }

    // =========================================================================
    // Snapshot Reads
    // =========================================================================

    /// Entries for one key as seen by a snapshot, in sequence order.
    fn entries_at(
        snapshot: &Snapshot<'_>,
        cf_ledger: &Arc<BoundColumnFamily<'_>>,
        key: &StockKey,
    ) -> Result<Vec<LedgerEntry>> {
        let prefix = keys::ledger_prefix(key);
        let iter = snapshot.iterator_cf(
            cf_ledger,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (k, value) = item?;
            if !k.starts_with(&prefix) {
                break;
            }
            entries.push(Self::deserialize(&value)?);
        }
        Ok(entries)
    }

    fn balance_at(
        snapshot: &Snapshot<'_>,
        cf_balances: &Arc<BoundColumnFamily<'_>>,
        key: &StockKey,
    ) -> Result<Option<BalanceRow>> {
        snapshot
            .get_cf(cf_balances, keys::balance_key(key))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Idempotency Helpers
    // =========================================================================

    /// Move a `processing` record owned by `attempt` to its final state.
    fn finalize_idempotency(
        &self,
        key: &str,
        attempt: u32,
        finish: impl FnOnce(&mut IdempotencyRecord),
    ) -> Result<()> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let record_key = keys::idempotency_key(key);
        let txn = self.db.transaction();

        let mut record: IdempotencyRecord = txn
            .get_for_update_cf(&cf, &record_key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "idempotency record",
                id: key.to_string(),
            })?;

        if record.status != IdempotencyStatus::Processing || record.attempt != attempt {
            return Err(StoreError::StaleClaim {
                key: key.to_string(),
                attempt,
            });
        }

        finish(&mut record);
        record.updated_at = Utc::now();
        txn.put_cf(&cf, &record_key, Self::serialize(&record)?)?;
        txn.commit()?;
        Ok(())
    }

    /// Records in creation order, via the creation-time index.
    fn idempotency_records_before(
        &self,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<(Vec<u8>, IdempotencyRecord)>> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let cf_index = self.cf(cf::IDEMPOTENCY_BY_CREATED)?;
        let upper = before.map(keys::created_millis_prefix);

        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf_index, IteratorMode::Start) {
            let (index_key, _) = item?;
            if upper.as_ref().is_some_and(|upper| index_key.as_ref() >= upper.as_slice()) {
                break;
            }
            let Some(key) = keys::extract_idempotency_key(&index_key) else {
                continue;
            };
            if let Some(data) = self.db.get_cf(&cf, keys::idempotency_key(&key))? {
                records.push((index_key.to_vec(), Self::deserialize(&data)?));
            }
        }
        Ok(records)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn append_event(&self, event: &BusinessEvent, policy: WritePolicy) -> Result<AppendReceipt> {
        let txn = self.db.transaction();
        let receipt = self.append_in_txn(&txn, event, policy, Utc::now())?;
        if receipt.replayed {
            return Ok(receipt);
        }
        txn.commit()?;
        Ok(receipt)
    }

    fn get_receipt(&self, business_event_id: &str) -> Result<Option<AppendReceipt>> {
        let cf = self.cf(cf::BUSINESS_EVENTS)?;
        self.db
            .get_cf(&cf, keys::business_event_key(business_event_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn entries_for_key(&self, key: &StockKey) -> Result<Vec<LedgerEntry>> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let snapshot = self.db.snapshot();
        Self::entries_at(&snapshot, &cf_ledger, key)
    }

    fn entries_by_reference(&self, reference: &Reference) -> Result<Vec<LedgerEntry>> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_by_ref = self.cf(cf::LEDGER_BY_REFERENCE)?;
        let prefix = keys::reference_prefix(reference);
        let snapshot = self.db.snapshot();

        let iter = snapshot.iterator_cf(
            &cf_by_ref,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );
        let mut entries = Vec::new();
        for item in iter {
            let (index_key, _) = item?;
            if !index_key.starts_with(&prefix) {
                break;
            }
            let Some(ledger_key) = keys::extract_ledger_key_from_reference_key(&index_key) else {
                continue;
            };
            if let Some(data) = snapshot.get_cf(&cf_ledger, ledger_key)? {
                entries.push(Self::deserialize(&data)?);
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Balance Cache Operations
    // =========================================================================

    fn get_balance(&self, key: &StockKey) -> Result<Option<BalanceRow>> {
        let cf = self.cf(cf::BALANCES)?;
        self.db
            .get_cf(&cf, keys::balance_key(key))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Reconciliation Reads
    // =========================================================================

    fn key_states(&self) -> Result<Vec<KeyState>> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_balances = self.cf(cf::BALANCES)?;
        let snapshot = self.db.snapshot();

        let mut states: BTreeMap<StockKey, KeyState> = BTreeMap::new();
        let empty = |key: StockKey| KeyState {
            key,
            entries: Vec::new(),
            cached: None,
        };

        for item in snapshot.iterator_cf(&cf_ledger, IteratorMode::Start) {
            let (k, value) = item?;
            let Some(key) = StockKey::from_bytes(&k) else {
                continue;
            };
            let entry: LedgerEntry = Self::deserialize(&value)?;
            states.entry(key).or_insert_with(|| empty(key)).entries.push(entry);
        }

        for item in snapshot.iterator_cf(&cf_balances, IteratorMode::Start) {
            let (k, value) = item?;
            let Some(key) = StockKey::from_bytes(&k) else {
                continue;
            };
            let row: BalanceRow = Self::deserialize(&value)?;
            states.entry(key).or_insert_with(|| empty(key)).cached = Some(row);
        }

        Ok(states.into_values().collect())
    }

    fn key_states_for(&self, keys: &[StockKey]) -> Result<Vec<KeyState>> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_balances = self.cf(cf::BALANCES)?;
        let snapshot = self.db.snapshot();

        keys.iter()
            .map(|key| {
                Ok(KeyState {
                    key: *key,
                    entries: Self::entries_at(&snapshot, &cf_ledger, key)?,
                    cached: Self::balance_at(&snapshot, &cf_balances, key)?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    fn claim_idempotency(
        &self,
        key: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<IdempotencyClaim> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let cf_index = self.cf(cf::IDEMPOTENCY_BY_CREATED)?;
        let record_key = keys::idempotency_key(key);
        let txn = self.db.transaction();

        let Some(data) = txn.get_for_update_cf(&cf, &record_key, true)? else {
            let record = IdempotencyRecord::processing(key, endpoint, now);
            txn.put_cf(&cf, &record_key, Self::serialize(&record)?)?;
            txn.put_cf(&cf_index, keys::idempotency_created_key(now, key), b"")?;
            txn.commit()?;
            return Ok(IdempotencyClaim::Acquired {
                attempt: record.attempt,
            });
        };

        let mut record: IdempotencyRecord = Self::deserialize(&data)?;
        if record.endpoint != endpoint {
            return Ok(IdempotencyClaim::EndpointMismatch(record.endpoint));
        }

        match record.status {
            IdempotencyStatus::Completed => Ok(IdempotencyClaim::Replay(
                record.response_body.unwrap_or(serde_json::Value::Null),
            )),
            IdempotencyStatus::Failed => Ok(IdempotencyClaim::Failed(
                record.error.unwrap_or_default(),
            )),
            IdempotencyStatus::Processing if record.is_stale(now, stale_after) => {
                record.attempt += 1;
                record.updated_at = now;
                txn.put_cf(&cf, &record_key, Self::serialize(&record)?)?;
                txn.commit()?;
                warn!(
                    idempotency_key = %key,
                    attempt = record.attempt,
                    "Reclaimed stale in-flight request"
                );
                Ok(IdempotencyClaim::Reclaimed {
                    attempt: record.attempt,
                })
            }
            IdempotencyStatus::Processing => Ok(IdempotencyClaim::InFlight {
                since: record.updated_at,
            }),
        }
    }

    fn complete_idempotency(
        &self,
        key: &str,
        attempt: u32,
        response: &serde_json::Value,
    ) -> Result<()> {
        self.finalize_idempotency(key, attempt, |record| {
            record.status = IdempotencyStatus::Completed;
            record.response_body = Some(response.clone());
        })
    }

    fn fail_idempotency(&self, key: &str, attempt: u32, error: &str) -> Result<()> {
        self.finalize_idempotency(key, attempt, |record| {
            record.status = IdempotencyStatus::Failed;
            record.error = Some(error.to_string());
        })
    }

    fn release_idempotency(&self, key: &str, attempt: u32) -> Result<()> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let cf_index = self.cf(cf::IDEMPOTENCY_BY_CREATED)?;
        let record_key = keys::idempotency_key(key);
        let txn = self.db.transaction();

        let record: IdempotencyRecord = txn
            .get_for_update_cf(&cf, &record_key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "idempotency record",
                id: key.to_string(),
            })?;

        if record.status != IdempotencyStatus::Processing || record.attempt != attempt {
            return Err(StoreError::StaleClaim {
                key: key.to_string(),
                attempt,
            });
        }

        txn.delete_cf(&cf, &record_key)?;
        txn.delete_cf(&cf_index, keys::idempotency_created_key(record.created_at, key))?;
        txn.commit()?;
        Ok(())
    }

    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        self.db
            .get_cf(&cf, keys::idempotency_key(key))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn stale_idempotency(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<IdempotencyRecord>> {
        Ok(self
            .idempotency_records_before(None)?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| record.is_stale(now, stale_after))
            .collect())
    }

    fn purge_idempotency(&self, before: DateTime<Utc>) -> Result<usize> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let cf_index = self.cf(cf::IDEMPOTENCY_BY_CREATED)?;
        let txn = self.db.transaction();

        let mut purged = 0;
        for (index_key, record) in self.idempotency_records_before(Some(before))? {
            // Live requests are never purged, whatever their age.
            if record.status == IdempotencyStatus::Processing {
                continue;
            }
            let record_key = keys::idempotency_key(&record.key);
            if txn.get_for_update_cf(&cf, &record_key, true)?.is_none() {
                continue;
            }
            txn.delete_cf(&cf, &record_key)?;
            txn.delete_cf(&cf_index, &index_key)?;
            purged += 1;
        }
        txn.commit()?;

        debug!(purged, %before, "Purged idempotency records");
        Ok(purged)
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    fn put_document(&self, document: &StockDocument) -> Result<()> {
        let cf = self.cf(cf::DOCUMENTS)?;
        self.db.put_cf(
            &cf,
            keys::document_key(&document.id),
            Self::serialize(document)?,
        )?;
        Ok(())
    }

    fn get_document(&self, id: &DocumentId) -> Result<Option<StockDocument>> {
        let cf = self.cf(cf::DOCUMENTS)?;
        self.db
            .get_cf(&cf, keys::document_key(id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn transition_document(
        &self,
        id: &DocumentId,
        action: Action,
        actor: &str,
        policy: WritePolicy,
    ) -> Result<(StockDocument, Option<AppendReceipt>)> {
        let cf = self.cf(cf::DOCUMENTS)?;
        let doc_key = keys::document_key(id);
        let now = Utc::now();
        let txn = self.db.transaction();

        let mut document: StockDocument = txn
            .get_for_update_cf(&cf, &doc_key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "document",
                id: id.to_string(),
            })?;

        let plan = document.plan(action, actor)?;
        let receipt = match &plan.event {
            Some(event) => Some(self.append_in_txn(&txn, event, policy, now)?),
            None => None,
        };

        document.apply(action, plan.to, actor, now);
        txn.put_cf(&cf, &doc_key, Self::serialize(&document)?)?;
        txn.commit()?;

        Ok((document, receipt))
    }
}

// =========================================================================
// Fault Injection
// =========================================================================

#[cfg(any(test, feature = "fault-injection"))]
impl RocksStore {
    /// Overwrite a cached quantity without writing a ledger entry.
    ///
    /// Simulates a cache row that drifted from the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn overwrite_cached_quantity(
        &self,
        key: &StockKey,
        product_id: stock_ledger_core::ProductId,
        quantity: Decimal,
    ) -> Result<()> {
        let cf = self.cf(cf::BALANCES)?;
        let mut row = self
            .get_balance(key)?
            .unwrap_or_else(|| BalanceRow::empty(*key, product_id));
        row.quantity_available = quantity;
        row.updated_at = Utc::now();
        self.db
            .put_cf(&cf, keys::balance_key(key), Self::serialize(&row)?)?;
        Ok(())
    }

    /// Delete a balance cache row, leaving its ledger entries in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_cached_row(&self, key: &StockKey) -> Result<()> {
        let cf = self.cf(cf::BALANCES)?;
        self.db.delete_cf(&cf, keys::balance_key(key))?;
        Ok(())
    }

    /// Hold the lock on a balance row while `hold` runs.
    ///
    /// Simulates a concurrent writer. When `quantity` is given it is committed
    /// to the row on release, as that writer's own change.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the commit fails.
    pub fn hold_balance_row<F: FnOnce()>(
        &self,
        key: &StockKey,
        quantity: Option<Decimal>,
        hold: F,
    ) -> Result<()> {
        let cf = self.cf(cf::BALANCES)?;
        let row_key = keys::balance_key(key);
        let txn = self.db.transaction();
        let current = txn.get_for_update_cf(&cf, &row_key, true)?;

        hold();

        if let (Some(data), Some(quantity)) = (current, quantity) {
            let mut row: BalanceRow = Self::deserialize(&data)?;
            row.quantity_available = quantity;
            row.updated_at = Utc::now();
            txn.put_cf(&cf, &row_key, Self::serialize(&row)?)?;
        }
        txn.commit()?;
        Ok(())
    }
}
