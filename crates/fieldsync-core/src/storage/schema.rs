//! SQLite schema for the offline store
//!
//! Every collection is a table of JSON bodies keyed by `id`, with secondary
//! indices as expression indices over `json_extract(body, '$.<key>')`.
//! Migrations are additive: moving to a newer version only creates missing
//! tables, indices and columns, never drops data.

use rusqlite::{Connection, OptionalExtension};

use super::error::{StorageError, StorageResult};
use crate::models::{Collection, IndexSpec};

/// Current schema version
///
/// - 1: fields, operations, observations, personnel, mutation queue
/// - 2: machinery, warehouse items, queue delivery bookkeeping
pub const SCHEMA_VERSION: u32 = 2;

/// Initialize or upgrade the schema to [`SCHEMA_VERSION`]
pub fn init_schema(conn: &Connection) -> StorageResult<()> {
    migrate(conn, SCHEMA_VERSION)
}

/// Upgrade the schema to `target`, applying every missing step in order
pub fn migrate(conn: &Connection, target: u32) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    let current = get_schema_version(conn)?.unwrap_or(0);
    if current > SCHEMA_VERSION {
        return Err(StorageError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for version in (current + 1)..=target {
        tracing::debug!(version, "Applying store schema step");
        apply_step(conn, version)?;
    }

    // Creates anything a partial earlier upgrade may have missed
    let effective = current.max(target);
    for collection in Collection::ALL {
        if collection.since_version() <= effective {
            create_collection(conn, collection)?;
        }
    }

    if target > current {
        conn.execute(
            "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
            [target.to_string()],
        )?;
    }

    Ok(())
}

fn apply_step(conn: &Connection, version: u32) -> StorageResult<()> {
    match version {
        1 => {
            conn.execute_batch(
                r#"
                -- Pending local edits, FIFO by sequence_id across all collections
                CREATE TABLE IF NOT EXISTS mutation_queue (
                    sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    action TEXT NOT NULL,
                    collection TEXT NOT NULL,
                    record_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    enqueued_at INTEGER NOT NULL,
                    synced INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_mutation_queue_pending
                    ON mutation_queue(synced, sequence_id);
                "#,
            )?;
        }
        2 => {
            if !column_exists(conn, "mutation_queue", "attempts")? {
                conn.execute_batch(
                    "ALTER TABLE mutation_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;",
                )?;
            }
            if !column_exists(conn, "mutation_queue", "last_error")? {
                conn.execute_batch("ALTER TABLE mutation_queue ADD COLUMN last_error TEXT;")?;
            }
        }
        _ => {}
    }

    for collection in Collection::ALL {
        if collection.since_version() == version {
            create_collection(conn, collection)?;
        }
    }

    Ok(())
}

/// Create a collection table and its indices if missing
fn create_collection(conn: &Connection, collection: Collection) -> StorageResult<()> {
    let table = collection.as_str();
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            company_id TEXT,
            body TEXT NOT NULL
        );
        "#
    ))?;

    for spec in collection.indices() {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table}({});",
            index_name(collection, spec),
            index_expr(spec),
        ))?;
    }

    Ok(())
}

/// SQLite name of a collection index
pub(crate) fn index_name(collection: Collection, spec: &IndexSpec) -> String {
    format!("idx_{}_{}", collection.as_str(), spec.name)
}

/// Indexed expression; queries must use the same text to hit the index
pub(crate) fn index_expr(spec: &IndexSpec) -> String {
    format!("json_extract(body, '$.{}')", spec.key)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> StorageResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> StorageResult<Option<u32>> {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")?
        .exists([])?;
    if !table_exists {
        return Ok(None);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| v.parse().ok()))
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
