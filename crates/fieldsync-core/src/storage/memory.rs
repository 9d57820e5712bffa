//! In-memory local store
//!
//! Volatile implementation of [`LocalStore`] used by tests and by callers
//! that want engine semantics without a file. A single lock covers every
//! collection and the queue, which makes `commit_local_write` and
//! `apply_snapshot` atomic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::{
    ItemFailure, LocalStore, PullPolicy, PutManyReport, SnapshotPlan, SnapshotReport, StoreStats,
    SCHEMA_VERSION,
};
use crate::models::{Collection, MutationAction, NewMutation, QueueEntry, Record};

#[derive(Default)]
struct Inner {
    /// Insertion-ordered records per collection
    collections: HashMap<Collection, Vec<Record>>,
    queue: BTreeMap<i64, QueueEntry>,
    next_sequence: i64,
}

impl Inner {
    fn records(&mut self, collection: Collection) -> &mut Vec<Record> {
        self.collections.entry(collection).or_default()
    }

    fn upsert(&mut self, collection: Collection, record: &Record) -> StorageResult<()> {
        let id = record.id().ok_or(StorageError::MissingId { collection })?;
        let records = self.records(collection);
        match records.iter_mut().find(|r| r.id().as_deref() == Some(id.as_str())) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn remove(&mut self, collection: Collection, id: &str) {
        self.records(collection)
            .retain(|r| r.id().as_deref() != Some(id));
    }

    fn append(&mut self, mutation: &NewMutation) -> i64 {
        self.next_sequence += 1;
        let sequence_id = self.next_sequence;
        self.queue.insert(
            sequence_id,
            QueueEntry {
                sequence_id,
                action: mutation.action,
                collection: mutation.collection,
                record_id: mutation.record_id.clone(),
                payload: mutation.payload.clone(),
                enqueued_at: mutation.enqueued_at,
                synced: false,
                attempts: 0,
                last_error: None,
            },
        );
        sequence_id
    }

    fn pending(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queue.values().filter(|entry| !entry.synced)
    }
}

/// Volatile [`LocalStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl LocalStore for MemoryStore {
    fn schema_version(&self) -> u32 {
        SCHEMA_VERSION
    }

    fn get_all(&self, collection: Collection) -> StorageResult<Vec<Record>> {
        Ok(self.lock()?.records(collection).clone())
    }

    fn get_by_id(&self, collection: Collection, id: &str) -> StorageResult<Option<Record>> {
        Ok(self
            .lock()?
            .records(collection)
            .iter()
            .find(|r| r.id().as_deref() == Some(id))
            .cloned())
    }

    fn get_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> StorageResult<Vec<Record>> {
        let spec = collection
            .index(index)
            .ok_or_else(|| StorageError::UnknownIndex {
                collection,
                index: index.to_string(),
            })?;

        Ok(self
            .lock()?
            .records(collection)
            .iter()
            .filter(|r| r.matches(spec.key, value))
            .cloned()
            .collect())
    }

    fn put(&self, collection: Collection, record: &Record) -> StorageResult<()> {
        self.lock()?.upsert(collection, record)
    }

    fn put_many(&self, collection: Collection, records: &[Record]) -> StorageResult<PutManyReport> {
        let mut inner = self.lock()?;
        let mut report = PutManyReport::default();
        for (index, record) in records.iter().enumerate() {
            match inner.upsert(collection, record) {
                Ok(()) => report.written += 1,
                Err(e) => report.failures.push(ItemFailure {
                    index,
                    id: record.id(),
                    error: e.to_string(),
                }),
            }
        }
        Ok(report)
    }

    fn remove(&self, collection: Collection, id: &str) -> StorageResult<()> {
        self.lock()?.remove(collection, id);
        Ok(())
    }

    fn clear(&self, collection: Collection) -> StorageResult<()> {
        self.lock()?.records(collection).clear();
        Ok(())
    }

    fn append_mutation(&self, mutation: &NewMutation) -> StorageResult<i64> {
        Ok(self.lock()?.append(mutation))
    }

    fn commit_local_write(&self, mutation: &NewMutation) -> StorageResult<i64> {
        let mut inner = self.lock()?;
        match mutation.action {
            MutationAction::Create | MutationAction::Update => {
                inner.upsert(mutation.collection, &mutation.payload)?
            }
            MutationAction::Delete => inner.remove(mutation.collection, &mutation.record_id),
        }
        Ok(inner.append(mutation))
    }

    fn pending_mutations(&self) -> StorageResult<Vec<QueueEntry>> {
        Ok(self.lock()?.pending().cloned().collect())
    }

    fn mark_synced(&self, sequence_id: i64) -> StorageResult<()> {
        if let Some(entry) = self.lock()?.queue.get_mut(&sequence_id) {
            entry.synced = true;
            entry.last_error = None;
        }
        Ok(())
    }

    fn record_failure(&self, sequence_id: i64, error: &str) -> StorageResult<()> {
        if let Some(entry) = self.lock()?.queue.get_mut(&sequence_id) {
            if !entry.synced {
                entry.attempts += 1;
                entry.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }

    fn purge_synced(&self) -> StorageResult<usize> {
        let mut inner = self.lock()?;
        let before = inner.queue.len();
        inner.queue.retain(|_, entry| !entry.synced);
        Ok(before - inner.queue.len())
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let mut inner = self.lock()?;
        let records = Collection::ALL
            .into_iter()
            .map(|c| (c, inner.records(c).len()))
            .collect();
        let pending = inner.pending().count();
        Ok(StoreStats {
            available: true,
            schema_version: SCHEMA_VERSION,
            records,
            pending_mutations: pending,
            synced_mutations: inner.queue.len() - pending,
        })
    }

    fn apply_snapshot(
        &self,
        collection: Collection,
        records: &[Record],
        policy: PullPolicy,
    ) -> StorageResult<SnapshotReport> {
        let mut inner = self.lock()?;
        let protected: HashSet<String> = inner
            .pending()
            .filter(|entry| entry.collection == collection)
            .map(|entry| entry.record_id.clone())
            .collect();
        let plan = SnapshotPlan::new(records, &protected);

        let mut report = SnapshotReport {
            skipped_pending: plan.skipped_pending,
            ..SnapshotReport::default()
        };
        for (index, record) in plan.fresh.iter().enumerate() {
            match inner.upsert(collection, record) {
                Ok(()) => report.written += 1,
                Err(e) => report.failures.push(ItemFailure {
                    index,
                    id: record.id(),
                    error: e.to_string(),
                }),
            }
        }

        if policy == PullPolicy::Mirror {
            let cached = inner.records(collection);
            let before = cached.len();
            cached.retain(|r| match r.id() {
                Some(id) => !plan.is_orphan(&id, &protected),
                None => true,
            });
            report.pruned = before - cached.len();
        }

        Ok(report)
    }
}
