//! RocksDB wrapper for hachimi storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Per-record exclusive read-modify-write (`run_exclusive`)
//! - Atomic write batches keeping records and both indexes consistent
//! - Index-backed key scans by score range and last-updated time
//! - Bulk retention deletes

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info, instrument};

use hachimi_types::ContentRecord;

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ITEMS, CF_SCORE_INDEX, CF_UPDATED_INDEX,
};
use crate::error::StorageError;
use crate::keys::{item_key, ScoreKey, UpdatedKey};

/// Index position of a stored record, captured when a transaction reads it.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    score: i64,
    updated_ms: i64,
}

impl IndexEntry {
    fn of(record: &ContentRecord) -> Self {
        Self {
            score: record.metadata.score,
            updated_ms: record.last_updated.timestamp_millis(),
        }
    }
}

enum PendingWrite {
    Put(ContentRecord),
    Delete,
}

/// Read-modify-write view of a single record inside `Storage::run_exclusive`.
///
/// Writes are staged and committed in one batch only if the closure
/// returns `Ok`.
pub struct RecordTxn {
    id: String,
    current: Option<ContentRecord>,
    indexed: Option<IndexEntry>,
    pending: Option<PendingWrite>,
}

impl RecordTxn {
    fn new(id: &str, current: Option<ContentRecord>) -> Self {
        let indexed = current.as_ref().map(IndexEntry::of);
        Self {
            id: id.to_string(),
            current,
            indexed,
            pending: None,
        }
    }

    /// Id this transaction is bound to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record as read at the start of the transaction.
    pub fn current(&self) -> Option<&ContentRecord> {
        self.current.as_ref()
    }

    /// Take ownership of the record read at the start of the transaction.
    pub fn take_current(&mut self) -> Option<ContentRecord> {
        self.current.take()
    }

    /// Stage an upsert. The record id must match the transaction id.
    pub fn put(&mut self, record: ContentRecord) {
        self.pending = Some(PendingWrite::Put(record));
    }

    /// Stage a delete.
    pub fn delete(&mut self) {
        self.pending = Some(PendingWrite::Delete);
    }
}

/// Main storage interface for hachimi
pub struct Storage {
    db: DB,
    /// One mutex per id with a transaction in flight
    record_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Shared by per-record transactions, exclusive for bulk deletes
    bulk_lock: RwLock<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            record_locks: DashMap::new(),
            bulk_lock: RwLock::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn record_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.record_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_record_lock(&self, id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        // Only the map's own handle left means nobody is waiting on it.
        self.record_locks
            .remove_if(id, |_, l| Arc::strong_count(l) == 1);
    }

    // ==================== Record Methods ====================

    /// Get a record by id.
    pub fn get_record(&self, id: &str) -> Result<Option<ContentRecord>, StorageError> {
        let cf = self.cf(CF_ITEMS)?;
        match self.db.get_cf(cf, item_key(id))? {
            Some(bytes) => Ok(Some(ContentRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a record with this id is stored.
    pub fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let cf = self.cf(CF_ITEMS)?;
        Ok(self.db.get_pinned_cf(cf, item_key(id))?.is_some())
    }

    /// Fetch many records at once, skipping ids that are not stored.
    ///
    /// Order follows `ids`.
    pub fn get_records(&self, ids: &[String]) -> Result<Vec<ContentRecord>, StorageError> {
        let cf = self.cf(CF_ITEMS)?;
        let keys = ids.iter().map(|id| (cf, item_key(id)));

        let mut records = Vec::with_capacity(ids.len());
        for result in self.db.multi_get_cf(keys) {
            if let Some(bytes) = result? {
                records.push(ContentRecord::from_bytes(&bytes)?);
            }
        }
        Ok(records)
    }

    /// Run a read-modify-write on one record atomically.
    ///
    /// The record is read under a per-id lock, handed to `f`, and whatever
    /// `f` staged is committed as a single batch (record plus index
    /// entries). If `f` or the commit fails, nothing is written.
    ///
    /// `f` must not call back into this `Storage`.
    pub fn run_exclusive<T, E, F>(&self, id: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut RecordTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        let _bulk = self.bulk_lock.read().unwrap_or_else(PoisonError::into_inner);
        let lock = self.record_lock(id);

        let result: Result<T, E> = (|| {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let current = self.get_record(id)?;
            let mut txn = RecordTxn::new(id, current);
            let value = f(&mut txn)?;
            self.commit(txn)?;
            Ok(value)
        })();

        self.release_record_lock(id, lock);
        result
    }

    /// Run a read-modify-write on several records as one atomic unit.
    ///
    /// Ids are deduplicated and locked in sorted order, so concurrent
    /// callers with overlapping ids cannot deadlock. `f` receives one
    /// transaction per distinct id in that order, and everything staged
    /// is committed in a single batch. If `f` or the commit fails, no
    /// record is written.
    pub fn run_exclusive_many<T, E, F>(&self, ids: &[String], f: F) -> Result<T, E>
    where
        F: FnOnce(&mut [RecordTxn]) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();

        let _bulk = self.bulk_lock.read().unwrap_or_else(PoisonError::into_inner);
        let locks: Vec<_> = ids.iter().map(|id| self.record_lock(id)).collect();

        let result: Result<T, E> = (|| {
            let _guards: Vec<_> = locks
                .iter()
                .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
                .collect();

            let mut txns = Vec::with_capacity(ids.len());
            for id in &ids {
                txns.push(RecordTxn::new(id, self.get_record(id)?));
            }
            let value = f(&mut txns)?;

            let mut batch = WriteBatch::default();
            let mut staged = 0;
            for txn in txns {
                if self.stage(txn, &mut batch)? {
                    staged += 1;
                }
            }
            if staged > 0 {
                self.db.write(batch).map_err(StorageError::from)?;
                debug!(staged, "Committed multi-record transaction");
            }
            Ok(value)
        })();

        for (id, lock) in ids.iter().zip(locks) {
            self.release_record_lock(id, lock);
        }
        result
    }

    fn commit(&self, txn: RecordTxn) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        if self.stage(txn, &mut batch)? {
            self.db.write(batch)?;
        }
        Ok(())
    }

    /// Stage a transaction's pending write into `batch`. Returns false if
    /// there was nothing to write.
    fn stage(&self, txn: RecordTxn, batch: &mut WriteBatch) -> Result<bool, StorageError> {
        let Some(pending) = txn.pending else {
            return Ok(false);
        };
        if matches!(pending, PendingWrite::Delete) && txn.indexed.is_none() {
            return Ok(false);
        }

        let items_cf = self.cf(CF_ITEMS)?;
        let score_cf = self.cf(CF_SCORE_INDEX)?;
        let updated_cf = self.cf(CF_UPDATED_INDEX)?;

        if let Some(old) = txn.indexed {
            batch.delete_cf(score_cf, ScoreKey::new(old.score, &txn.id).to_bytes());
            batch.delete_cf(updated_cf, UpdatedKey::new(old.updated_ms, &txn.id).to_bytes());
        }

        match pending {
            PendingWrite::Put(record) => {
                if record.id != txn.id {
                    return Err(StorageError::Key(format!(
                        "transaction for {} cannot write record {}",
                        txn.id, record.id
                    )));
                }
                let entry = IndexEntry::of(&record);
                batch.put_cf(items_cf, item_key(&record.id), record.to_bytes()?);
                batch.put_cf(score_cf, ScoreKey::new(entry.score, &record.id).to_bytes(), b"");
                batch.put_cf(
                    updated_cf,
                    UpdatedKey::new(entry.updated_ms, &record.id).to_bytes(),
                    b"",
                );
                debug!(id = %record.id, score = entry.score, "Staged record");
            }
            PendingWrite::Delete => {
                batch.delete_cf(items_cf, item_key(&txn.id));
                debug!(id = %txn.id, "Staged delete");
            }
        }
        Ok(true)
    }

    /// Upsert a record as-is (no merge).
    pub fn put_record(&self, record: &ContentRecord) -> Result<(), StorageError> {
        self.run_exclusive(&record.id, |txn| {
            txn.put(record.clone());
            Ok::<_, StorageError>(())
        })
    }

    /// Delete a record. Returns false if it was not stored.
    pub fn delete_record(&self, id: &str) -> Result<bool, StorageError> {
        self.run_exclusive(id, |txn| {
            let existed = txn.current().is_some();
            txn.delete();
            Ok::<_, StorageError>(existed)
        })
    }

    // ==================== Index Scans ====================

    /// Ids with `min <= score < max`. `None` leaves a side unbounded.
    #[instrument(skip(self))]
    pub fn keys_in_score_range(
        &self,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_SCORE_INDEX)?;
        let start = min.map(ScoreKey::prefix);
        let end = max.map(ScoreKey::prefix);

        let mode = match &start {
            Some(prefix) => IteratorMode::From(prefix, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, _) = item?;
            if let Some(end) = &end {
                if key.as_ref() >= end.as_slice() {
                    break;
                }
            }
            ids.push(ScoreKey::from_bytes(&key)?.id);
        }
        debug!(count = ids.len(), "Score range scan");
        Ok(ids)
    }

    /// Ids whose last update is at or before `timestamp_ms`.
    pub fn keys_updated_before(&self, timestamp_ms: i64) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_UPDATED_INDEX)?;
        let end = UpdatedKey::prefix(timestamp_ms.saturating_add(1));

        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.as_ref() >= end.as_slice() {
                break;
            }
            ids.push(UpdatedKey::from_bytes(&key)?.id);
        }
        Ok(ids)
    }

    /// Most recently updated records, newest first.
    pub fn recent_records(&self, limit: usize) -> Result<Vec<ContentRecord>, StorageError> {
        let cf = self.cf(CF_UPDATED_INDEX)?;
        let mut ids = Vec::with_capacity(limit);
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (key, _) = item?;
            ids.push(UpdatedKey::from_bytes(&key)?.id);
        }
        self.get_records(&ids)
    }

    /// Every stored record, in id order.
    pub fn all_records(&self) -> Result<Vec<ContentRecord>, StorageError> {
        let cf = self.cf(CF_ITEMS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(ContentRecord::from_bytes(&value)?);
        }
        Ok(records)
    }

    // ==================== Bulk Deletes ====================

    /// Stage deletion of a record and its index entries into `batch`.
    fn stage_delete(&self, batch: &mut WriteBatch, id: &str) -> Result<bool, StorageError> {
        let Some(record) = self.get_record(id)? else {
            return Ok(false);
        };
        let entry = IndexEntry::of(&record);
        batch.delete_cf(self.cf(CF_ITEMS)?, item_key(id));
        batch.delete_cf(
            self.cf(CF_SCORE_INDEX)?,
            ScoreKey::new(entry.score, id).to_bytes(),
        );
        batch.delete_cf(
            self.cf(CF_UPDATED_INDEX)?,
            UpdatedKey::new(entry.updated_ms, id).to_bytes(),
        );
        Ok(true)
    }

    /// Delete the given records in one batch. Returns how many existed.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub fn delete_many(&self, ids: &[String]) -> Result<usize, StorageError> {
        let _bulk = self.bulk_lock.write().unwrap_or_else(PoisonError::into_inner);

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for id in ids {
            if self.stage_delete(&mut batch, id)? {
                count += 1;
            }
        }
        if count > 0 {
            self.db.write(batch)?;
        }
        info!(count, "Deleted records");
        Ok(count)
    }

    /// Delete every record last updated at or before `timestamp_ms`, in one
    /// batch. Returns the number deleted.
    #[instrument(skip(self))]
    pub fn delete_updated_before(&self, timestamp_ms: i64) -> Result<usize, StorageError> {
        let _bulk = self.bulk_lock.write().unwrap_or_else(PoisonError::into_inner);

        let ids = self.keys_updated_before(timestamp_ms)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for id in &ids {
            if self.stage_delete(&mut batch, id)? {
                count += 1;
            }
        }
        if count > 0 {
            self.db.write(batch)?;
        }
        info!(count, "Deleted records by age");
        Ok(count)
    }

    /// Delete all records. Returns the number deleted.
    pub fn delete_all(&self) -> Result<usize, StorageError> {
        let _bulk = self.bulk_lock.write().unwrap_or_else(PoisonError::into_inner);

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item?;
                batch.delete_cf(cf, key);
                if *cf_name == CF_ITEMS {
                    count += 1;
                }
            }
        }
        self.db.write(batch)?;
        info!(count, "Cleared all records");
        Ok(count)
    }

    // ===== Admin Operations =====

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Trigger manual compaction on all column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
            }
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            record_count: self.count_cf_entries(self.cf(CF_ITEMS)?)?,
            score_index_count: self.count_cf_entries(self.cf(CF_SCORE_INDEX)?)?,
            updated_index_count: self.count_cf_entries(self.cf(CF_UPDATED_INDEX)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of records stored
    pub record_count: u64,
    /// Entries in the score index (equals record_count when consistent)
    pub score_index_count: u64,
    /// Entries in the last-updated index
    pub updated_index_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use hachimi_types::{merge_record, PartialContentRecord, Platform};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_706_540_400_000).unwrap()
    }

    fn record(id: &str, score: i64, updated: DateTime<Utc>) -> ContentRecord {
        let mut record = ContentRecord::new(id, Platform::Zhihu, updated);
        record.metadata.score = score;
        record
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let r = record("x1", 3, t0());
        storage.put_record(&r).unwrap();

        assert_eq!(storage.get_record("x1").unwrap(), Some(r));
        assert!(storage.exists("x1").unwrap());
        assert!(!storage.exists("x2").unwrap());
    }

    #[test]
    fn test_score_index_follows_updates() {
        let (storage, _temp) = create_test_storage();
        storage.put_record(&record("a", 2, t0())).unwrap();
        storage.put_record(&record("b", 9, t0())).unwrap();

        assert_eq!(storage.keys_in_score_range(Some(7), None).unwrap(), vec!["b"]);
        assert_eq!(storage.keys_in_score_range(None, Some(7)).unwrap(), vec!["a"]);

        // Rescoring moves the index entry rather than duplicating it.
        storage.put_record(&record("a", 12, t0())).unwrap();
        let mut high = storage.keys_in_score_range(Some(7), None).unwrap();
        high.sort();
        assert_eq!(high, vec!["a", "b"]);
        assert!(storage.keys_in_score_range(None, Some(7)).unwrap().is_empty());

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.score_index_count, 2);
        assert_eq!(stats.updated_index_count, 2);
    }

    #[test]
    fn test_failed_transaction_writes_nothing() {
        let (storage, _temp) = create_test_storage();
        let result: Result<(), StorageError> = storage.run_exclusive("x1", |txn| {
            txn.put(record("x1", 5, t0()));
            Err(StorageError::Key("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(storage.get_record("x1").unwrap().is_none());
        assert!(storage.keys_in_score_range(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rejects_foreign_id() {
        let (storage, _temp) = create_test_storage();
        let result: Result<(), StorageError> = storage.run_exclusive("x1", |txn| {
            txn.put(record("other", 5, t0()));
            Ok(())
        });
        assert!(matches!(result, Err(StorageError::Key(_))));
        assert!(storage.get_record("other").unwrap().is_none());
    }

    #[test]
    fn test_delete_record_missing_is_false() {
        let (storage, _temp) = create_test_storage();
        assert!(!storage.delete_record("nope").unwrap());

        storage.put_record(&record("x1", 1, t0())).unwrap();
        assert!(storage.delete_record("x1").unwrap());
        assert!(storage.get_record("x1").unwrap().is_none());
        assert_eq!(storage.get_stats().unwrap().score_index_count, 0);
    }

    #[test]
    fn test_get_records_skips_missing() {
        let (storage, _temp) = create_test_storage();
        storage.put_record(&record("a", 1, t0())).unwrap();
        storage.put_record(&record("c", 1, t0())).unwrap();

        let ids = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        let found: Vec<_> = storage
            .get_records(&ids)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found, vec!["c", "a"]);
    }

    #[test]
    fn test_delete_updated_before_is_inclusive() {
        let (storage, _temp) = create_test_storage();
        storage.put_record(&record("old", 1, t0())).unwrap();
        storage
            .put_record(&record("edge", 1, t0() + Duration::hours(1)))
            .unwrap();
        storage
            .put_record(&record("new", 1, t0() + Duration::hours(2)))
            .unwrap();

        let cutoff = (t0() + Duration::hours(1)).timestamp_millis();
        let mut doomed = storage.keys_updated_before(cutoff).unwrap();
        doomed.sort();
        assert_eq!(doomed, vec!["edge", "old"]);

        assert_eq!(storage.delete_updated_before(cutoff).unwrap(), 2);
        assert!(storage.exists("new").unwrap());
        assert_eq!(storage.get_stats().unwrap().updated_index_count, 1);
    }

    #[test]
    fn test_recent_records_newest_first() {
        let (storage, _temp) = create_test_storage();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            storage
                .put_record(&record(id, 1, t0() + Duration::minutes(i as i64)))
                .unwrap();
        }
        let recent: Vec<_> = storage
            .recent_records(2)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(recent, vec!["c", "b"]);
    }

    #[test]
    fn test_delete_many_and_delete_all() {
        let (storage, _temp) = create_test_storage();
        for id in ["a", "b", "c", "d"] {
            storage.put_record(&record(id, 1, t0())).unwrap();
        }
        let ids = vec!["a".to_string(), "zz".to_string(), "b".to_string()];
        assert_eq!(storage.delete_many(&ids).unwrap(), 2);
        assert_eq!(storage.delete_all().unwrap(), 2);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.score_index_count, 0);
        assert_eq!(stats.updated_index_count, 0);
    }

    #[test]
    fn test_multi_record_transaction_commits_together() {
        let (storage, _temp) = create_test_storage();
        storage.put_record(&record("a", 1, t0())).unwrap();
        storage.put_record(&record("b", 2, t0())).unwrap();

        let ids = vec!["b".to_string(), "a".to_string(), "missing".to_string(), "a".to_string()];
        let seen: Vec<String> = storage
            .run_exclusive_many(&ids, |txns| {
                let mut seen = Vec::new();
                for txn in txns.iter_mut() {
                    seen.push(txn.id().to_string());
                    if let Some(mut r) = txn.take_current() {
                        r.metadata.score += 10;
                        txn.put(r);
                    }
                }
                Ok::<_, StorageError>(seen)
            })
            .unwrap();

        assert_eq!(seen, vec!["a", "b", "missing"]);
        assert_eq!(storage.get_record("a").unwrap().unwrap().metadata.score, 11);
        assert_eq!(storage.get_record("b").unwrap().unwrap().metadata.score, 12);
        assert!(!storage.exists("missing").unwrap());
        assert_eq!(storage.keys_in_score_range(None, Some(10)).unwrap().len(), 0);
        assert!(storage.record_locks.is_empty());
    }

    #[test]
    fn test_multi_record_transaction_failure_writes_nothing() {
        let (storage, _temp) = create_test_storage();
        storage.put_record(&record("a", 1, t0())).unwrap();
        storage.put_record(&record("b", 2, t0())).unwrap();

        // The second record's staged write is invalid, so the first must not land.
        let ids = vec!["a".to_string(), "b".to_string()];
        let result: Result<(), StorageError> = storage.run_exclusive_many(&ids, |txns| {
            let mut a = txns[0].take_current().unwrap();
            a.metadata.score = 50;
            txns[0].put(a);
            txns[1].put(record("intruder", 3, t0()));
            Ok(())
        });

        assert!(matches!(result, Err(StorageError::Key(_))));
        assert_eq!(storage.get_record("a").unwrap().unwrap().metadata.score, 1);
        assert!(storage.get_record("intruder").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_merges_lose_no_actions() {
        let (storage, _temp) = create_test_storage();
        let storage = Arc::new(storage);
        let threads = 8;
        let per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        storage
                            .run_exclusive("shared", |txn| {
                                let merged = merge_record(
                                    txn.take_current(),
                                    PartialContentRecord::new("shared", Platform::Bilibili),
                                    Utc::now(),
                                )
                                .map_err(|e| StorageError::Key(e.to_string()))?;
                                txn.put(merged);
                                Ok::<_, StorageError>(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = storage.get_record("shared").unwrap().unwrap();
        // First merge creates one synthetic view; later merges add none.
        assert_eq!(stored.actions.len(), 1);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.score_index_count, 1);
        assert_eq!(stats.updated_index_count, 1);
        assert!(storage.record_locks.is_empty());
    }
}
