//! Local store
//!
//! The on-device cache of every domain collection plus the mutation queue.
//!
//! ## Implementations
//!
//! - [`SqliteStore`]: the durable store, one SQLite file per device
//! - [`MemoryStore`]: volatile store for tests
//! - [`UnavailableStore`]: degraded mode when persistence cannot be opened;
//!   every operation is a no-op and callers fall back to the network
//!
//! The server is authoritative; records here are cached copies. The only
//! data that exists nowhere else is the unsynced part of the mutation queue.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod unavailable;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::models::{Collection, NewMutation, QueueEntry, Record};

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
pub use unavailable::UnavailableStore;

/// How a pulled snapshot is reconciled with the cached collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Insert-or-replace only; records deleted on the server linger locally
    UpsertOnly,
    /// Also remove cached records absent from the snapshot
    #[default]
    Mirror,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::UpsertOnly => "upsert-only",
            PullPolicy::Mirror => "mirror",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert-only" | "upsert_only" | "upsert" => Ok(PullPolicy::UpsertOnly),
            "mirror" => Ok(PullPolicy::Mirror),
            other => Err(format!(
                "Unknown pull policy '{}'. Use 'mirror' or 'upsert-only'.",
                other
            )),
        }
    }
}

/// One record that could not be written by a bulk operation
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    /// Position in the input slice
    pub index: usize,
    pub id: Option<String>,
    pub error: String,
}

/// Outcome of [`LocalStore::put_many`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutManyReport {
    pub written: usize,
    pub failures: Vec<ItemFailure>,
}

impl PutManyReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of [`LocalStore::apply_snapshot`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotReport {
    /// Records inserted or replaced from the snapshot
    pub written: usize,
    /// Snapshot records not applied because a local edit is still queued
    pub skipped_pending: usize,
    /// Cached records removed because the server no longer has them
    pub pruned: usize,
    pub failures: Vec<ItemFailure>,
}

/// Counts reported by `status`-style callers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub available: bool,
    pub schema_version: u32,
    pub records: BTreeMap<Collection, usize>,
    pub pending_mutations: usize,
    pub synced_mutations: usize,
}

/// The local store contract shared by facades and the sync manager
///
/// Calls are short synchronous critical sections; implementations serialize
/// writers internally so the store can be shared behind an `Arc`.
pub trait LocalStore: Send + Sync {
    /// Whether persistence is available on this device
    fn is_available(&self) -> bool {
        true
    }

    fn schema_version(&self) -> u32;

    // ==================== Collections ====================

    /// Every cached record, in the store's natural order
    fn get_all(&self, collection: Collection) -> StorageResult<Vec<Record>>;

    fn get_by_id(&self, collection: Collection, id: &str) -> StorageResult<Option<Record>>;

    /// Records whose indexed key equals `value`
    fn get_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> StorageResult<Vec<Record>>;

    /// Insert or replace by primary key
    fn put(&self, collection: Collection, record: &Record) -> StorageResult<()>;

    /// Bulk insert-or-replace; item failures are reported, not fatal
    fn put_many(&self, collection: Collection, records: &[Record]) -> StorageResult<PutManyReport>;

    /// Delete by primary key; absent keys are a no-op
    fn remove(&self, collection: Collection, id: &str) -> StorageResult<()>;

    /// Forget every cached record of a collection
    fn clear(&self, collection: Collection) -> StorageResult<()>;

    // ==================== Mutation queue ====================

    /// Append a queue entry, returning its sequence id
    fn append_mutation(&self, mutation: &NewMutation) -> StorageResult<i64>;

    /// Apply a local edit and queue it as one atomic unit
    ///
    /// Create/update put the payload, delete removes the record. Either both
    /// the record change and the queue entry persist, or neither does.
    fn commit_local_write(&self, mutation: &NewMutation) -> StorageResult<i64>;

    /// Unsynced entries in ascending sequence order
    fn pending_mutations(&self) -> StorageResult<Vec<QueueEntry>>;

    fn mark_synced(&self, sequence_id: i64) -> StorageResult<()>;

    /// Bump the attempt counter of an entry whose delivery failed
    fn record_failure(&self, sequence_id: i64, error: &str) -> StorageResult<()>;

    /// Physically remove synced entries
    fn purge_synced(&self) -> StorageResult<usize>;

    fn stats(&self) -> StorageResult<StoreStats>;

    /// Ids in `collection` with an unsynced queue entry
    fn pending_record_ids(&self, collection: Collection) -> StorageResult<HashSet<String>> {
        Ok(self
            .pending_mutations()?
            .into_iter()
            .filter(|entry| entry.collection == collection)
            .map(|entry| entry.record_id)
            .collect())
    }

    /// Reconcile a collection with a server snapshot
    ///
    /// Records with a pending local mutation are neither overwritten nor
    /// pruned: the queued edit has not reached the server yet, so the
    /// snapshot cannot reflect it.
    fn apply_snapshot(
        &self,
        collection: Collection,
        records: &[Record],
        policy: PullPolicy,
    ) -> StorageResult<SnapshotReport> {
        let protected = self.pending_record_ids(collection)?;
        let plan = SnapshotPlan::new(records, &protected);

        let put = self.put_many(collection, &plan.fresh)?;
        let mut report = SnapshotReport {
            written: put.written,
            skipped_pending: plan.skipped_pending,
            pruned: 0,
            failures: put.failures,
        };

        if policy == PullPolicy::Mirror {
            for local in self.get_all(collection)? {
                let Some(id) = local.id() else { continue };
                if plan.is_orphan(&id, &protected) {
                    self.remove(collection, &id)?;
                    report.pruned += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Split of a snapshot into records to write and records held back
pub(crate) struct SnapshotPlan {
    pub fresh: Vec<Record>,
    pub skipped_pending: usize,
    pub server_ids: HashSet<String>,
}

impl SnapshotPlan {
    pub fn new(records: &[Record], protected: &HashSet<String>) -> Self {
        let mut fresh = Vec::with_capacity(records.len());
        let mut skipped_pending = 0;
        let mut server_ids = HashSet::with_capacity(records.len());

        for record in records {
            match record.id() {
                Some(id) if protected.contains(&id) => {
                    skipped_pending += 1;
                    server_ids.insert(id);
                }
                Some(id) => {
                    server_ids.insert(id);
                    fresh.push(record.clone());
                }
                // put_many reports it as an item failure
                None => fresh.push(record.clone()),
            }
        }

        Self {
            fresh,
            skipped_pending,
            server_ids,
        }
    }

    pub fn is_orphan(&self, id: &str, protected: &HashSet<String>) -> bool {
        !self.server_ids.contains(id) && !protected.contains(id)
    }
}

/// Open the durable store, degrading to [`UnavailableStore`] on failure
pub fn open_local_store(config: &Config) -> Arc<dyn LocalStore> {
    match SqliteStore::open(config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.sqlite_path().display(),
                "Offline store unavailable, falling back to network-only mode"
            );
            Arc::new(UnavailableStore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_policy_parse() {
        assert_eq!("mirror".parse::<PullPolicy>(), Ok(PullPolicy::Mirror));
        assert_eq!(
            "upsert-only".parse::<PullPolicy>(),
            Ok(PullPolicy::UpsertOnly)
        );
        assert!("merge".parse::<PullPolicy>().is_err());
    }

    #[test]
    fn test_snapshot_plan_holds_back_pending_ids() {
        let protected: HashSet<String> = ["f2".to_string()].into_iter().collect();
        let records = vec![
            Record::with_id("f1"),
            Record::with_id("f2"),
            Record::new().with("name", "no id"),
        ];

        let plan = SnapshotPlan::new(&records, &protected);
        assert_eq!(plan.fresh.len(), 2);
        assert_eq!(plan.skipped_pending, 1);
        assert!(!plan.is_orphan("f1", &protected));
        assert!(!plan.is_orphan("f2", &protected));
        assert!(plan.is_orphan("f9", &protected));
    }

    #[test]
    fn test_open_local_store_degrades_when_path_is_unusable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        // A regular file where the data directory should be
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let config = Config {
            data_dir: blocker,
            ..Config::default()
        };
        let store = open_local_store(&config);
        assert!(!store.is_available());
    }

    #[test]
    fn test_index_lookup_agrees_across_stores() {
        use serde_json::json;

        let records = vec![
            Record::with_id("m1").with("status", 1),
            Record::with_id("m2").with("status", true),
            Record::with_id("m3").with("status", json!(null)),
            Record::with_id("m4").with("status", 1.0),
            Record::with_id("m5").with("status", "1"),
            Record::with_id("m6").with("status", json!(["a", "b"])),
            Record::with_id("m7").with("status", json!({"code": 1})),
            Record::with_id("m8"),
        ];
        let stores: Vec<(&str, Box<dyn LocalStore>)> = vec![
            ("memory", Box::new(MemoryStore::new())),
            ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
        ];

        let cases = [
            (json!(1), vec!["m1", "m4"]),
            (json!(1.0), vec!["m1", "m4"]),
            (json!(true), vec!["m2"]),
            (json!(false), vec![]),
            (json!(null), vec!["m3"]),
            (json!("1"), vec!["m5"]),
            (json!(["a", "b"]), vec!["m6"]),
            (json!({"code": 1}), vec!["m7"]),
        ];

        for (name, store) in &stores {
            store.put_many(Collection::Machinery, &records).unwrap();
            for (value, expected) in &cases {
                let found = store
                    .get_by_index(Collection::Machinery, "status", value)
                    .unwrap();
                let ids: Vec<_> = found.iter().filter_map(|r| r.id()).collect();
                assert_eq!(&ids, expected, "{} store, status = {}", name, value);
            }
        }
    }
}
