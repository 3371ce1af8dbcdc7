//! SQLite storage: manifestation cache, work membership index and work documents.
//!
//! One connection per thread. Writes to keyed rows are guarded by an optimistic version column
//! instead of locks; a write that finds a different version fails with
//! [`PipelineError::Conflict`](crate::error::PipelineError::Conflict).

mod cache;
mod work;

use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::types::Timestamp;

pub use cache::{
    cache_ids, cache_modified, delete_cache_entry, load_cache_entry, replace_work_contains,
    save_cache_entry, work_contains,
};
pub use work::{
    delete_work, delete_works_for_corepo_id, load_work, object_modified, save_work,
    works_for_corepo_id,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    manifestation_id TEXT PRIMARY KEY,
    modified_ms INTEGER NOT NULL,
    version INTEGER NOT NULL,
    content TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS work_contains (
    corepo_work_id TEXT NOT NULL,
    manifestation_id TEXT NOT NULL,
    PRIMARY KEY (corepo_work_id, manifestation_id)
);
CREATE INDEX IF NOT EXISTS idx_work_contains_manifestation ON work_contains(manifestation_id);

CREATE TABLE IF NOT EXISTS work_object (
    persistent_work_id TEXT PRIMARY KEY,
    corepo_work_id TEXT NOT NULL,
    modified_ms INTEGER NOT NULL,
    version INTEGER NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_work_object_corepo ON work_object(corepo_work_id);
"#;

const WAL_PRAGMAS: &str = r#"
PRAGMA synchronous = NORMAL;
PRAGMA wal_autocheckpoint = 10000;
PRAGMA journal_size_limit = 67108864;
"#;

/// How long a writer waits for another connection's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Open or create the store and ensure schema + WAL.
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT).context("set busy timeout")?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// In-memory store with the same schema (single connection only).
pub fn open_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(conn)
}

pub(crate) fn to_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<Timestamp> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}
