//! Degraded store used when persistence cannot be opened
//!
//! Every operation succeeds without effect. Callers check
//! [`LocalStore::is_available`] and go to the network instead.

use serde_json::Value;

use super::error::StorageResult;
use super::{LocalStore, PutManyReport, StoreStats};
use crate::models::{Collection, NewMutation, QueueEntry, Record};

/// A [`LocalStore`] that stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl LocalStore for UnavailableStore {
    fn is_available(&self) -> bool {
        false
    }

    fn schema_version(&self) -> u32 {
        0
    }

    fn get_all(&self, _collection: Collection) -> StorageResult<Vec<Record>> {
        Ok(Vec::new())
    }

    fn get_by_id(&self, _collection: Collection, _id: &str) -> StorageResult<Option<Record>> {
        Ok(None)
    }

    fn get_by_index(
        &self,
        _collection: Collection,
        _index: &str,
        _value: &Value,
    ) -> StorageResult<Vec<Record>> {
        Ok(Vec::new())
    }

    fn put(&self, _collection: Collection, _record: &Record) -> StorageResult<()> {
        Ok(())
    }

    fn put_many(&self, _collection: Collection, _records: &[Record]) -> StorageResult<PutManyReport> {
        Ok(PutManyReport::default())
    }

    fn remove(&self, _collection: Collection, _id: &str) -> StorageResult<()> {
        Ok(())
    }

    fn clear(&self, _collection: Collection) -> StorageResult<()> {
        Ok(())
    }

    fn append_mutation(&self, _mutation: &NewMutation) -> StorageResult<i64> {
        Ok(0)
    }

    fn commit_local_write(&self, _mutation: &NewMutation) -> StorageResult<i64> {
        Ok(0)
    }

    fn pending_mutations(&self) -> StorageResult<Vec<QueueEntry>> {
        Ok(Vec::new())
    }

    fn mark_synced(&self, _sequence_id: i64) -> StorageResult<()> {
        Ok(())
    }

    fn record_failure(&self, _sequence_id: i64, _error: &str) -> StorageResult<()> {
        Ok(())
    }

    fn purge_synced(&self) -> StorageResult<usize> {
        Ok(0)
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        Ok(StoreStats::default())
    }
}
