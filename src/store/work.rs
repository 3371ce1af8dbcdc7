//! Consolidated work documents, keyed by persistent work id.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::{cache_modified, from_millis, to_millis};
use crate::error::PipelineError;
use crate::types::{Timestamp, Versioned, WorkDocument};

pub fn load_work(conn: &Connection, persistent_work_id: &str) -> Result<Option<Versioned<WorkDocument>>> {
    let row = conn
        .query_row(
            "SELECT modified_ms, version, content FROM work_object WHERE persistent_work_id = ?1",
            [persistent_work_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .context("read work")?;
    let Some((ms, version, json)) = row else {
        return Ok(None);
    };
    let value: WorkDocument = serde_json::from_str(&json)
        .with_context(|| format!("decode work document {persistent_work_id}"))?;
    Ok(Some(Versioned {
        value,
        modified: from_millis(ms)?,
        version,
    }))
}

/// Persistent ids of the documents built from `corepo_work_id`.
pub fn works_for_corepo_id(conn: &Connection, corepo_work_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT persistent_work_id FROM work_object WHERE corepo_work_id = ?1 ORDER BY persistent_work_id")
        .context("prepare work select")?;
    let rows = stmt.query_map([corepo_work_id], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Write a work document if its version is still `expected_version` (`None`: must not exist).
/// Returns the new version.
pub fn save_work(
    conn: &Connection,
    corepo_work_id: &str,
    doc: &WorkDocument,
    modified: Timestamp,
    expected_version: Option<i64>,
) -> Result<i64> {
    let json = serde_json::to_string(doc).context("encode work document")?;
    let id = doc.work_id.as_str();
    let (changed, version) = match expected_version {
        None => (
            conn.execute(
                "INSERT OR IGNORE INTO work_object (persistent_work_id, corepo_work_id, modified_ms, version, content) VALUES (?1, ?2, ?3, 1, ?4)",
                params![id, corepo_work_id, to_millis(modified), json],
            )
            .context("insert work")?,
            1,
        ),
        Some(v) => (
            conn.execute(
                "UPDATE work_object SET corepo_work_id = ?2, modified_ms = ?3, version = version + 1, content = ?4 WHERE persistent_work_id = ?1 AND version = ?5",
                params![id, corepo_work_id, to_millis(modified), json, v],
            )
            .context("update work")?,
            v + 1,
        ),
    };
    if changed == 0 {
        return Err(PipelineError::Conflict(id.to_string()).into());
    }
    Ok(version)
}

pub fn delete_work(conn: &Connection, persistent_work_id: &str) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM work_object WHERE persistent_work_id = ?1",
            [persistent_work_id],
        )
        .context("delete work")?;
    Ok(n > 0)
}

pub fn delete_works_for_corepo_id(conn: &Connection, corepo_work_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM work_object WHERE corepo_work_id = ?1",
        [corepo_work_id],
    )
    .context("delete works")
}

/// Modification time of a work document (by persistent id) or else of a cache entry.
pub fn object_modified(conn: &Connection, id: &str) -> Result<Option<Timestamp>> {
    let work_ms = conn
        .query_row(
            "SELECT modified_ms FROM work_object WHERE persistent_work_id = ?1",
            [id],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .context("read work timestamp")?;
    if let Some(ms) = work_ms {
        return Ok(Some(from_millis(ms)?));
    }
    Ok(cache_modified(conn, id)?.map(|(modified, _)| modified))
}
