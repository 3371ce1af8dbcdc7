//! Manifestation cache rows and the per-work membership index.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

use super::{from_millis, to_millis};
use crate::error::PipelineError;
use crate::types::{Content, Timestamp, Versioned};

/// `(modified, version)` of a cache row, without decoding its content.
pub fn cache_modified(conn: &Connection, manifestation_id: &str) -> Result<Option<(Timestamp, i64)>> {
    let row = conn
        .query_row(
            "SELECT modified_ms, version FROM cache WHERE manifestation_id = ?1",
            [manifestation_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()
        .context("read cache timestamp")?;
    match row {
        Some((ms, version)) => Ok(Some((from_millis(ms)?, version))),
        None => Ok(None),
    }
}

pub fn load_cache_entry(conn: &Connection, manifestation_id: &str) -> Result<Option<Versioned<Content>>> {
    let row = conn
        .query_row(
            "SELECT modified_ms, version, content FROM cache WHERE manifestation_id = ?1",
            [manifestation_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .context("read cache entry")?;
    let Some((ms, version, json)) = row else {
        return Ok(None);
    };
    let value: Content = serde_json::from_str(&json)
        .with_context(|| format!("decode cached content of {manifestation_id}"))?;
    Ok(Some(Versioned {
        value,
        modified: from_millis(ms)?,
        version,
    }))
}

/// Write a cache row if its version is still `expected_version` (`None`: row must not exist).
/// Returns the new version.
pub fn save_cache_entry(
    conn: &Connection,
    content: &Content,
    modified: Timestamp,
    expected_version: Option<i64>,
) -> Result<i64> {
    let json = serde_json::to_string(content).context("encode content")?;
    let id = content.manifestation_id.as_str();
    let (changed, version) = match expected_version {
        None => (
            conn.execute(
                "INSERT OR IGNORE INTO cache (manifestation_id, modified_ms, version, content) VALUES (?1, ?2, 1, ?3)",
                params![id, to_millis(modified), json],
            )
            .context("insert cache entry")?,
            1,
        ),
        Some(v) => (
            conn.execute(
                "UPDATE cache SET modified_ms = ?2, version = version + 1, content = ?3 WHERE manifestation_id = ?1 AND version = ?4",
                params![id, to_millis(modified), json, v],
            )
            .context("update cache entry")?,
            v + 1,
        ),
    };
    if changed == 0 {
        return Err(PipelineError::Conflict(id.to_string()).into());
    }
    Ok(version)
}

pub fn delete_cache_entry(conn: &Connection, manifestation_id: &str) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM cache WHERE manifestation_id = ?1", [manifestation_id])
        .context("delete cache entry")?;
    Ok(n > 0)
}

/// All cached manifestation ids.
pub fn cache_ids(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT manifestation_id FROM cache")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

/// Manifestations recorded as belonging to `corepo_work_id`.
pub fn work_contains(conn: &Connection, corepo_work_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT manifestation_id FROM work_contains WHERE corepo_work_id = ?1")
        .context("prepare work_contains select")?;
    let rows = stmt.query_map([corepo_work_id], |row| row.get::<_, String>(0))?;
    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

/// Replace the membership of `corepo_work_id` with exactly `manifestation_ids`, atomically.
pub fn replace_work_contains(
    conn: &mut Connection,
    corepo_work_id: &str,
    manifestation_ids: &BTreeSet<String>,
) -> Result<()> {
    let tx = conn.transaction().context("begin transaction")?;
    tx.execute(
        "DELETE FROM work_contains WHERE corepo_work_id = ?1",
        [corepo_work_id],
    )
    .context("clear work_contains")?;
    {
        let mut stmt = tx
            .prepare("INSERT INTO work_contains (corepo_work_id, manifestation_id) VALUES (?1, ?2)")
            .context("prepare work_contains insert")?;
        for id in manifestation_ids {
            stmt.execute([corepo_work_id, id.as_str()])
                .context("insert work_contains")?;
        }
    }
    tx.commit().context("commit transaction")?;
    Ok(())
}
