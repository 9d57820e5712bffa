//! SQLite-backed local store
//!
//! One table per collection holding the JSON body of each record, plus the
//! `mutation_queue` table. Local writes and their queue entries share a
//! transaction, and snapshot reconciliation runs in a single transaction per
//! collection, so a crash never leaves a local edit without its queue entry.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::schema::{get_schema_version, index_expr, init_schema, migrate, needs_init};
use super::{
    ItemFailure, LocalStore, PullPolicy, PutManyReport, SnapshotPlan, SnapshotReport, StoreStats,
};
use crate::config::Config;
use crate::models::{Collection, IndexSpec, MutationAction, NewMutation, QueueEntry, Record};

const QUEUE_COLUMNS: &str = "sequence_id, action, collection, record_id, payload, enqueued_at, synced, attempts, last_error";

/// Durable local store on a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
    version: u32,
}

impl SqliteStore {
    /// Open or create the store under the configured data directory
    pub fn open(config: &Config) -> StorageResult<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        } else {
            // Still refuses databases written by newer builds
            migrate(&conn, super::SCHEMA_VERSION)?;
        }

        tracing::debug!(path = %path.display(), "Opened offline store");
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database at an older schema version (for testing upgrades)
    #[cfg(test)]
    pub(crate) fn open_in_memory_at(version: u32) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn, version)?;
        Self::from_connection(conn)
    }

    /// Run raw SQL against the connection (for testing corruption)
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StorageResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let version = get_schema_version(&conn)?.unwrap_or(0);
        Ok(Self {
            conn: Mutex::new(conn),
            version,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl LocalStore for SqliteStore {
    fn schema_version(&self) -> u32 {
        self.version
    }

    fn get_all(&self, collection: Collection) -> StorageResult<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT body FROM {} ORDER BY rowid", collection))?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode_body(collection, b)).collect()
    }

    fn get_by_id(&self, collection: Collection, id: &str) -> StorageResult<Option<Record>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?", collection),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| decode_body(collection, &b)).transpose()
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

        let (predicate, bind) = index_predicate(spec, value);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT body FROM {} WHERE {} ORDER BY rowid",
            collection, predicate
        ))?;
        let bodies = stmt
            .query_map(params_from_iter(bind), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode_body(collection, b)).collect()
    }

    fn put(&self, collection: Collection, record: &Record) -> StorageResult<()> {
        let conn = self.conn()?;
        upsert(&conn, collection, record)
    }

    fn put_many(&self, collection: Collection, records: &[Record]) -> StorageResult<PutManyReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let report = upsert_each(&tx, collection, records);
        tx.commit()?;
        Ok(report)
    }

    fn remove(&self, collection: Collection, id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", collection),
            params![id],
        )?;
        Ok(())
    }

    fn clear(&self, collection: Collection) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(&format!("DELETE FROM {}", collection), [])?;
        Ok(())
    }

    fn append_mutation(&self, mutation: &NewMutation) -> StorageResult<i64> {
        let conn = self.conn()?;
        insert_mutation(&conn, mutation)
    }

    fn commit_local_write(&self, mutation: &NewMutation) -> StorageResult<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        match mutation.action {
            MutationAction::Create | MutationAction::Update => {
                upsert(&tx, mutation.collection, &mutation.payload)?
            }
            MutationAction::Delete => {
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?", mutation.collection),
                    params![mutation.record_id],
                )?;
            }
        }
        let sequence_id = insert_mutation(&tx, mutation)?;

        tx.commit()?;
        Ok(sequence_id)
    }

    fn pending_mutations(&self) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM mutation_queue WHERE synced = 0 ORDER BY sequence_id"
        ))?;
        let rows = stmt
            .query_map([], QueueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::hydrate).collect()
    }

    fn mark_synced(&self, sequence_id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mutation_queue SET synced = 1, last_error = NULL WHERE sequence_id = ?",
            params![sequence_id],
        )?;
        Ok(())
    }

    fn record_failure(&self, sequence_id: i64, error: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mutation_queue SET attempts = attempts + 1, last_error = ?
             WHERE sequence_id = ? AND synced = 0",
            params![error, sequence_id],
        )?;
        Ok(())
    }

    fn purge_synced(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM mutation_queue WHERE synced = 1", [])?)
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn()?;

        let mut records = BTreeMap::new();
        for collection in Collection::ALL {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", collection),
                [],
                |row| row.get(0),
            )?;
            records.insert(collection, count as usize);
        }

        let (pending, synced): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(synced = 0), 0), COALESCE(SUM(synced = 1), 0) FROM mutation_queue",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            available: true,
            schema_version: self.version,
            records,
            pending_mutations: pending as usize,
            synced_mutations: synced as usize,
        })
    }

    fn pending_record_ids(&self, collection: Collection) -> StorageResult<HashSet<String>> {
        let conn = self.conn()?;
        pending_ids(&conn, collection)
    }

    fn apply_snapshot(
        &self,
        collection: Collection,
        records: &[Record],
        policy: PullPolicy,
    ) -> StorageResult<SnapshotReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Read inside the transaction so a concurrent local write is either
        // fully before (and protected) or fully after this snapshot
        let protected = pending_ids(&tx, collection)?;
        let plan = SnapshotPlan::new(records, &protected);

        let put = upsert_each(&tx, collection, &plan.fresh);
        let mut report = SnapshotReport {
            written: put.written,
            skipped_pending: plan.skipped_pending,
            pruned: 0,
            failures: put.failures,
        };

        if policy == PullPolicy::Mirror {
            let local_ids = {
                let mut stmt = tx.prepare(&format!("SELECT id FROM {}", collection))?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };
            for id in local_ids {
                if plan.is_orphan(&id, &protected) {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE id = ?", collection),
                        params![id],
                    )?;
                    report.pruned += 1;
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }
}

// ==================== Private helpers ====================

fn upsert(conn: &Connection, collection: Collection, record: &Record) -> StorageResult<()> {
    let id = record.id().ok_or(StorageError::MissingId { collection })?;
    let body = serde_json::to_string(record)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, company_id, body) VALUES (?, ?, ?)",
            collection
        ),
        params![id, record.company_id(), body],
    )?;
    Ok(())
}

/// Upsert every record, collecting per-item failures
fn upsert_each(tx: &Transaction<'_>, collection: Collection, records: &[Record]) -> PutManyReport {
    let mut report = PutManyReport::default();
    for (index, record) in records.iter().enumerate() {
        match upsert(tx, collection, record) {
            Ok(()) => report.written += 1,
            Err(e) => report.failures.push(ItemFailure {
                index,
                id: record.id(),
                error: e.to_string(),
            }),
        }
    }
    report
}

fn insert_mutation(conn: &Connection, mutation: &NewMutation) -> StorageResult<i64> {
    let payload = serde_json::to_string(&mutation.payload)?;
    conn.execute(
        "INSERT INTO mutation_queue (action, collection, record_id, payload, enqueued_at, synced)
         VALUES (?, ?, ?, ?, ?, 0)",
        params![
            mutation.action.as_str(),
            mutation.collection.as_str(),
            mutation.record_id,
            payload,
            mutation.enqueued_at.timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn pending_ids(conn: &Connection, collection: Collection) -> StorageResult<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT record_id FROM mutation_queue WHERE synced = 0 AND collection = ?",
    )?;
    let ids = stmt
        .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

fn decode_body(collection: Collection, body: &str) -> StorageResult<Record> {
    serde_json::from_str(body).map_err(|e| StorageError::CorruptRow {
        table: collection.to_string(),
        details: e.to_string(),
    })
}

/// WHERE clause matching `value` at an indexed key, with its bound parameter
///
/// The JSON type is checked alongside the value, so `true` never matches `1`
/// and `null` matches an explicit null but not a missing key. This keeps
/// lookups in line with `Record::matches`.
fn index_predicate(spec: &IndexSpec, value: &Value) -> (String, Option<SqlValue>) {
    let kind = format!("json_type(body, '$.{}')", spec.key);
    let extract = index_expr(spec);
    let typed = |types: &str, bind: SqlValue| {
        (format!("{kind} IN ({types}) AND {extract} = ?"), Some(bind))
    };

    match value {
        Value::Null => (format!("{kind} = 'null'"), None),
        Value::Bool(true) => (format!("{kind} = 'true'"), None),
        Value::Bool(false) => (format!("{kind} = 'false'"), None),
        Value::Number(n) => {
            let bind = match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            };
            typed("'integer', 'real'", bind)
        }
        Value::String(s) => typed("'text'", SqlValue::Text(s.clone())),
        // json_extract returns composites as minified JSON text
        Value::Array(_) => typed("'array'", SqlValue::Text(value.to_string())),
        Value::Object(_) => typed("'object'", SqlValue::Text(value.to_string())),
    }
}

/// Raw queue row before parsing
struct QueueRow {
    sequence_id: i64,
    action: String,
    collection: String,
    record_id: String,
    payload: String,
    enqueued_at: i64,
    synced: bool,
    attempts: i64,
    last_error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence_id: row.get(0)?,
            action: row.get(1)?,
            collection: row.get(2)?,
            record_id: row.get(3)?,
            payload: row.get(4)?,
            enqueued_at: row.get(5)?,
            synced: row.get(6)?,
            attempts: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    fn hydrate(self) -> StorageResult<QueueEntry> {
        let corrupt = |details: String| StorageError::CorruptRow {
            table: "mutation_queue".to_string(),
            details,
        };

        let action: MutationAction = self.action.parse().map_err(corrupt)?;
        let collection: Collection = self
            .collection
            .parse()
            .map_err(|e: crate::models::UnknownCollection| corrupt(e.to_string()))?;
        let payload: Record =
            serde_json::from_str(&self.payload).map_err(|e| corrupt(e.to_string()))?;
        let enqueued_at =
            DateTime::from_timestamp_millis(self.enqueued_at).unwrap_or_else(Utc::now);

        Ok(QueueEntry {
            sequence_id: self.sequence_id,
            action,
            collection,
            record_id: self.record_id,
            payload,
            enqueued_at,
            synced: self.synced,
            attempts: self.attempts.max(0) as u32,
            last_error: self.last_error,
        })
    }
}
