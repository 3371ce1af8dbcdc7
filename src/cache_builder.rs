//! Bring the manifestation cache in line with a work tree.
//!
//! Stale fragments are generated concurrently on a shared rayon pool, each task leasing one
//! generator from the [`GeneratorPool`]. Tasks only compute; every write happens on the calling
//! thread as results arrive over a channel, so one job never interleaves two writes of the same
//! row. Orphans (in the membership index but no longer in the tree) are deleted first, and the
//! membership index is replaced only after every regeneration succeeded.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, error, info};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PipelineError, PoolError, is_conflict};
use crate::generator::ContentGenerator;
use crate::pool::ResourcePool;
use crate::repository::RepositoryClient;
use crate::store;
use crate::tree::{FragmentRef, WorkTree};
use crate::types::{Content, Timestamp};

pub type GeneratorPool = ResourcePool<Box<dyn ContentGenerator>>;

/// Re-reads after a version conflict before the job gives up.
const MAX_CONFLICT_RETRIES: usize = 5;

/// What one [`ParallelCacheBuilder::update_cache`] run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    /// Orphaned entries deleted.
    pub removed: Vec<String>,
    /// Entries written with freshly generated content.
    pub written: Vec<String>,
    /// Stale entries that another writer had already refreshed by the time ours was ready.
    pub superseded: Vec<String>,
    /// Entries that were already current.
    pub up_to_date: usize,
}

/// A cache entry must be regenerated iff it is absent or strictly older than its source.
pub fn is_stale(stored: Option<Timestamp>, source_modified: Timestamp) -> bool {
    stored.is_none_or(|modified| modified < source_modified)
}

#[derive(Clone)]
pub struct ParallelCacheBuilder {
    generators: Arc<GeneratorPool>,
    executor: Arc<rayon::ThreadPool>,
}

impl ParallelCacheBuilder {
    pub fn new(generators: Arc<GeneratorPool>, executor: Arc<rayon::ThreadPool>) -> Self {
        Self {
            generators,
            executor,
        }
    }

    /// Executor sized `executor_threads` (0: rayon's default).
    pub fn with_threads(generators: Arc<GeneratorPool>, executor_threads: usize) -> Result<Self> {
        let executor = rayon::ThreadPoolBuilder::new()
            .num_threads(executor_threads)
            .thread_name(|i| format!("cache-builder-{i}"))
            .build()
            .context("build cache builder executor")?;
        Ok(Self::new(generators, Arc::new(executor)))
    }

    pub fn generators(&self) -> &GeneratorPool {
        &self.generators
    }

    /// Delete orphans and regenerate stale entries for `tree`.
    ///
    /// Fragments of related units are refreshed when stale too, but they are not owned by this
    /// work, so they are never deleted here.
    pub fn update_cache(
        &self,
        conn: &Connection,
        client: &dyn RepositoryClient,
        tree: &WorkTree,
    ) -> Result<CacheUpdate> {
        let mut update = CacheUpdate::default();
        let active = tree.extract_manifestation_ids();
        debug!("{}: active manifestations {:?}", tree.work_id, active);

        let stored = store::work_contains(conn, &tree.work_id)?;
        for orphan in stored.difference(&active) {
            info!("{}: removing manifestation {}", tree.work_id, orphan);
            store::delete_cache_entry(conn, orphan)?;
            update.removed.push(orphan.clone());
        }

        let mut candidates: BTreeMap<&str, &FragmentRef> = BTreeMap::new();
        for fragment in tree.active_fragments().chain(tree.related_fragments()) {
            candidates
                .entry(fragment.manifestation_id.as_str())
                .or_insert(fragment);
        }
        let mut scheduled = Vec::new();
        for (id, fragment) in candidates {
            let stored = store::cache_modified(conn, id)?.map(|(modified, _)| modified);
            if is_stale(stored, fragment.source_modified) {
                info!("{}: upserting manifestation {}", tree.work_id, id);
                scheduled.push(fragment.clone());
            } else {
                update.up_to_date += 1;
            }
        }
        if scheduled.is_empty() {
            return Ok(update);
        }

        let (result_tx, result_rx) = bounded::<(FragmentRef, Result<Content, PoolError>)>(scheduled.len());
        let abort = AtomicBool::new(false);
        let mut first_error: Option<anyhow::Error> = None;
        let generators = self.generators.as_ref();
        let work_id = tree.work_id.as_str();

        self.executor.in_place_scope(|scope| {
            for fragment in scheduled {
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move |_| {
                    if abort.load(Ordering::Relaxed) {
                        return;
                    }
                    debug!("{}: generating content for {}", work_id, fragment.manifestation_id);
                    let result = generators.with_leased(|generator| {
                        fragment.generate(client, generator.as_mut())
                    });
                    let _ = result_tx.send((fragment, result));
                });
            }
            drop(result_tx);

            for (fragment, result) in result_rx.iter() {
                if first_error.is_some() {
                    continue;
                }
                let outcome = result
                    .map_err(anyhow::Error::from)
                    .and_then(|content| persist(conn, &fragment, content));
                match outcome {
                    Ok(true) => update.written.push(fragment.manifestation_id),
                    Ok(false) => update.superseded.push(fragment.manifestation_id),
                    Err(e) => {
                        error!("{}: error building manifestation {}: {:#}", work_id, fragment.manifestation_id, e);
                        abort.store(true, Ordering::Relaxed);
                        first_error = Some(e.context(format!(
                            "Error building manifestation {}",
                            fragment.manifestation_id
                        )));
                    }
                }
            }
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(update),
        }
    }

    /// Record exactly the tree's active manifestations as the work's members.
    pub fn update_work_contains(&self, conn: &mut Connection, tree: &WorkTree) -> Result<()> {
        store::replace_work_contains(conn, &tree.work_id, &tree.extract_manifestation_ids())
    }

    /// Drop every cache entry the work owns, and its membership. Returns the removed ids.
    pub fn delete_cache_for_work(&self, conn: &mut Connection, corepo_work_id: &str) -> Result<Vec<String>> {
        let members = store::work_contains(conn, corepo_work_id)?;
        for id in &members {
            info!("{}: removing manifestation {}", corepo_work_id, id);
            store::delete_cache_entry(conn, id)?;
        }
        store::replace_work_contains(conn, corepo_work_id, &Default::default())?;
        Ok(members.into_iter().collect())
    }
}

/// Write generated content unless a fresher entry landed meanwhile. Returns whether it wrote.
fn persist(conn: &Connection, fragment: &FragmentRef, mut content: Content) -> Result<bool> {
    content.manifestation_id = fragment.manifestation_id.clone();
    for _ in 0..MAX_CONFLICT_RETRIES {
        let current = store::cache_modified(conn, &fragment.manifestation_id)?;
        if let Some((modified, _)) = current
            && !is_stale(Some(modified), fragment.source_modified)
        {
            debug!("Skipping {}: stored entry is as fresh", fragment.manifestation_id);
            return Ok(false);
        }
        debug!("Saving content for {}", fragment.manifestation_id);
        match store::save_cache_entry(
            conn,
            &content,
            fragment.source_modified,
            current.map(|(_, version)| version),
        ) {
            Ok(_) => return Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!("Conflict saving {}, retrying", fragment.manifestation_id);
            }
            Err(e) => return Err(e),
        }
    }
    Err(PipelineError::Conflict(fragment.manifestation_id.clone()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn staleness() {
        let t = |s| chrono::Utc.timestamp_opt(s, 0).unwrap();
        assert!(is_stale(None, t(10)));
        assert!(is_stale(Some(t(9)), t(10)));
        assert!(!is_stale(Some(t(10)), t(10)));
        assert!(!is_stale(Some(t(11)), t(10)));
    }

    fn fragment(id: &str, source_modified: Timestamp) -> FragmentRef {
        FragmentRef {
            manifestation_id: id.to_string(),
            repository_id: "870970-basis:1".to_string(),
            local_stream: "localData.870970".to_string(),
            source_modified,
            deleted: false,
        }
    }

    fn content(id: &str, title: &str) -> Content {
        Content {
            manifestation_id: id.to_string(),
            title: Some(title.to_string()),
            ..Content::default()
        }
    }

    #[test]
    fn late_writer_leaves_fresher_entry_alone() {
        let t = |s: i64| chrono::Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap();
        let conn = store::open_db_in_memory().unwrap();
        store::save_cache_entry(&conn, &content("870970:1", "Newer"), t(20), None).unwrap();

        let wrote = persist(&conn, &fragment("870970:1", t(10)), content("870970:1", "Older")).unwrap();
        assert!(!wrote);
        let stored = store::load_cache_entry(&conn, "870970:1").unwrap().unwrap();
        assert_eq!(stored.value.title.as_deref(), Some("Newer"));
        assert_eq!(stored.modified, t(20));
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn newer_source_replaces_stored_entry() {
        let t = |s: i64| chrono::Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap();
        let conn = store::open_db_in_memory().unwrap();
        store::save_cache_entry(&conn, &content("870970:1", "Old"), t(10), None).unwrap();

        let wrote = persist(&conn, &fragment("870970:1", t(20)), content("870970:1", "New")).unwrap();
        assert!(wrote);
        let stored = store::load_cache_entry(&conn, "870970:1").unwrap().unwrap();
        assert_eq!(stored.value.title.as_deref(), Some("New"));
        assert_eq!(stored.version, 2);
    }
}
