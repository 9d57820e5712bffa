//! Mutation queue
//!
//! Durable, ordered log of local edits the server has not acknowledged yet,
//! layered on the local store's queue collection. The queue is the single
//! source of truth for "what the server does not know": an entry leaves the
//! pending set only through [`MutationQueue::mark_synced`].
//!
//! Writers:
//! - the data access facade appends (via `enqueue` or, atomically with the
//!   local record change, `commit`)
//! - the sync manager marks entries synced

use std::sync::Arc;

use crate::models::{Collection, MutationAction, NewMutation, QueueEntry, Record};
use crate::storage::{LocalStore, StorageError, StorageResult};

/// Handle to the mutation queue of a local store
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<dyn LocalStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Append an entry with `synced = false`
    ///
    /// Returns the assigned sequence id once the entry is durably stored.
    pub fn enqueue(
        &self,
        action: MutationAction,
        collection: Collection,
        payload: Record,
    ) -> StorageResult<i64> {
        let mutation = NewMutation::new(action, collection, payload)
            .ok_or(StorageError::MissingId { collection })?;
        self.store.append_mutation(&mutation)
    }

    /// Apply the record change to the store and append the entry atomically
    pub fn commit(&self, mutation: &NewMutation) -> StorageResult<i64> {
        let sequence_id = self.store.commit_local_write(mutation)?;
        tracing::debug!(
            sequence_id,
            action = %mutation.action,
            collection = %mutation.collection,
            record_id = %mutation.record_id,
            "Queued local mutation"
        );
        Ok(sequence_id)
    }

    /// Unsynced entries, oldest first
    pub fn pending(&self) -> StorageResult<Vec<QueueEntry>> {
        self.store.pending_mutations()
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        Ok(self.store.stats()?.pending_mutations)
    }

    /// Flag an entry as acknowledged by the server
    pub fn mark_synced(&self, sequence_id: i64) -> StorageResult<()> {
        self.store.mark_synced(sequence_id)
    }

    /// Record a failed delivery attempt; the entry stays pending
    pub fn record_failure(&self, sequence_id: i64, error: &str) -> StorageResult<()> {
        self.store.record_failure(sequence_id, error)
    }

    /// Drop acknowledged entries, returning how many were removed
    pub fn purge_synced(&self) -> StorageResult<usize> {
        self.store.purge_synced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SqliteStore};

    fn queues() -> Vec<MutationQueue> {
        vec![
            MutationQueue::new(Arc::new(MemoryStore::new())),
            MutationQueue::new(Arc::new(SqliteStore::open_in_memory().unwrap())),
        ]
    }

    #[test]
    fn test_enqueue_assigns_increasing_sequence_ids() {
        for queue in queues() {
            let a = queue
                .enqueue(MutationAction::Create, Collection::Fields, Record::with_id("f1"))
                .unwrap();
            let b = queue
                .enqueue(MutationAction::Delete, Collection::Personnel, Record::with_id("p1"))
                .unwrap();
            assert!(b > a);

            let pending = queue.pending().unwrap();
            assert_eq!(pending.len(), 2);
            assert!(pending.iter().all(|e| !e.synced));
            assert_eq!(pending[0].sequence_id, a);
        }
    }

    #[test]
    fn test_enqueue_requires_id() {
        for queue in queues() {
            let err = queue
                .enqueue(
                    MutationAction::Create,
                    Collection::Fields,
                    Record::new().with("name", "North Plot"),
                )
                .unwrap_err();
            assert!(matches!(err, StorageError::MissingId { .. }));
            assert_eq!(queue.pending_count().unwrap(), 0);
        }
    }

    #[test]
    fn test_mark_synced_removes_from_pending() {
        for queue in queues() {
            let a = queue
                .enqueue(MutationAction::Create, Collection::Fields, Record::with_id("f1"))
                .unwrap();
            let b = queue
                .enqueue(MutationAction::Update, Collection::Fields, Record::with_id("f1"))
                .unwrap();

            queue.mark_synced(a).unwrap();
            // Marking twice is harmless
            queue.mark_synced(a).unwrap();

            let pending = queue.pending().unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].sequence_id, b);
            assert_eq!(queue.pending_count().unwrap(), 1);
            assert_eq!(queue.purge_synced().unwrap(), 1);
        }
    }

    #[test]
    fn test_failures_do_not_reorder() {
        for queue in queues() {
            let a = queue
                .enqueue(MutationAction::Create, Collection::Fields, Record::with_id("f1"))
                .unwrap();
            let b = queue
                .enqueue(MutationAction::Create, Collection::Fields, Record::with_id("f2"))
                .unwrap();

            queue.record_failure(a, "HTTP 503").unwrap();

            let pending = queue.pending().unwrap();
            let seqs: Vec<_> = pending.iter().map(|e| e.sequence_id).collect();
            assert_eq!(seqs, vec![a, b]);
            assert_eq!(pending[0].attempts, 1);
        }
    }
}
