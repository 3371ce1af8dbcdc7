//! Assemble the [`WorkDocument`] for a tree from cached manifestation content, and store it.

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PipelineError, is_conflict};
use crate::store;
use crate::tree::WorkTree;
use crate::types::{Content, RelationSummary, RelationType, Timestamp, TypedValue, WorkDocument};

const MAX_CONFLICT_RETRIES: usize = 5;

/// Content of cached manifestations by id.
pub trait ContentLookup {
    fn lookup(&self, manifestation_id: &str) -> Result<Content>;
}

impl<F> ContentLookup for F
where
    F: Fn(&str) -> Result<Content>,
{
    fn lookup(&self, manifestation_id: &str) -> Result<Content> {
        self(manifestation_id)
    }
}

/// Lookup backed by the cache table. A missing row is a dangling reference.
pub struct CacheLookup<'a> {
    conn: &'a Connection,
}

impl<'a> CacheLookup<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ContentLookup for CacheLookup<'_> {
    fn lookup(&self, manifestation_id: &str) -> Result<Content> {
        store::load_cache_entry(self.conn, manifestation_id)?
            .map(|entry| entry.value)
            .ok_or_else(|| PipelineError::DanglingReference(manifestation_id.to_string()).into())
    }
}

/// Collects relation summaries per unit and relation type, then flattens them into one sorted,
/// deduplicated list referenced by index.
#[derive(Debug, Default)]
pub struct RelationIndexer {
    per_unit: BTreeMap<String, BTreeMap<RelationType, Vec<RelationSummary>>>,
}

impl RelationIndexer {
    pub fn add(&mut self, unit_id: &str, relation_type: RelationType, summary: RelationSummary) {
        self.per_unit
            .entry(unit_id.to_string())
            .or_default()
            .entry(relation_type)
            .or_default()
            .push(summary);
    }

    /// `(global list, unit -> type -> sorted indices into the list)`.
    #[allow(clippy::type_complexity)]
    pub fn finish(
        self,
    ) -> (
        Vec<RelationSummary>,
        BTreeMap<String, BTreeMap<RelationType, Vec<usize>>>,
    ) {
        let global: Vec<RelationSummary> = self
            .per_unit
            .values()
            .flat_map(|types| types.values().flatten().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let indices = self
            .per_unit
            .into_iter()
            .map(|(unit_id, types)| {
                let types = types
                    .into_iter()
                    .map(|(relation_type, summaries)| {
                        let idx: BTreeSet<usize> = summaries
                            .iter()
                            .filter_map(|s| global.binary_search(s).ok())
                            .collect();
                        (relation_type, idx.into_iter().collect())
                    })
                    .collect();
                (unit_id, types)
            })
            .collect();
        (global, indices)
    }
}

/// Build the document for a non-empty tree.
pub fn build_work_document(tree: &WorkTree, lookup: &dyn ContentLookup) -> Result<WorkDocument> {
    let primary_id = tree.primary_manifestation_id().ok_or_else(|| {
        PipelineError::Inconsistent(format!("{} has no primary manifestation", tree.work_id))
    })?;
    let primary = lookup.lookup(primary_id)?;
    let mut doc = WorkDocument {
        work_id: crate::types::persistent_work_id(primary_id),
        title: primary.title.clone(),
        full_title: primary.full_title.clone(),
        creators: TypedValue::distinct_set(&primary.creators),
        description: primary.description.clone(),
        ..WorkDocument::default()
    };

    let mut subjects: Vec<TypedValue> = primary.subjects.clone();
    for (unit_id, unit) in &tree.units {
        let mut summaries = BTreeSet::new();
        for fragment in unit.active_fragments() {
            let content = lookup.lookup(&fragment.manifestation_id)?;
            subjects.extend(content.subjects.iter().cloned());
            summaries.insert(content.summary());
        }
        doc.per_unit_manifestations.insert(unit_id.clone(), summaries);
    }
    doc.subjects = TypedValue::distinct_set(&subjects);

    let mut relations = RelationIndexer::default();
    for (unit_id, unit) in &tree.units {
        for relation in &unit.relations {
            let related = tree.external_relations.get(relation).ok_or_else(|| {
                PipelineError::Inconsistent(format!(
                    "{unit_id} relates to {} which is not in the tree",
                    relation.unit_id
                ))
            })?;
            for fragment in related.active_fragments() {
                let content = lookup.lookup(&fragment.manifestation_id)?;
                relations.add(unit_id, relation.relation_type, content.relation_summary(relation.relation_type));
            }
        }
    }
    let (global, per_unit) = relations.finish();
    doc.global_relations = global;
    doc.per_unit_relations = per_unit;
    Ok(doc)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Unchanged,
}

/// Store `doc` for `corepo_work_id`, removing documents stored for the same work under another
/// persistent id (ownership moved to another manifestation).
pub fn save_work_document(
    conn: &Connection,
    corepo_work_id: &str,
    doc: &WorkDocument,
    modified: Timestamp,
) -> Result<SaveOutcome> {
    for stale in store::works_for_corepo_id(conn, corepo_work_id)? {
        if stale != doc.work_id {
            info!("{}: ownership moved from {} to {}", corepo_work_id, stale, doc.work_id);
            store::delete_work(conn, &stale)?;
        }
    }
    for _ in 0..MAX_CONFLICT_RETRIES {
        let current = store::load_work(conn, &doc.work_id)?;
        if let Some(cur) = &current
            && cur.value == *doc
            && cur.modified == modified
        {
            debug!("{}: document {} unchanged", corepo_work_id, doc.work_id);
            return Ok(SaveOutcome::Unchanged);
        }
        match store::save_work(conn, corepo_work_id, doc, modified, current.map(|c| c.version)) {
            Ok(_) => return Ok(SaveOutcome::Written),
            Err(e) if is_conflict(&e) => debug!("Conflict saving {}, retrying", doc.work_id),
            Err(e) => return Err(e),
        }
    }
    Err(PipelineError::Conflict(doc.work_id.clone()).into())
}

/// Remove every document built from `corepo_work_id`.
pub fn delete_work(conn: &Connection, corepo_work_id: &str) -> Result<usize> {
    let n = store::delete_works_for_corepo_id(conn, corepo_work_id)
        .with_context(|| format!("delete documents of {corepo_work_id}"))?;
    if n > 0 {
        info!("{}: deleted {} work document(s)", corepo_work_id, n);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pid: &str) -> RelationSummary {
        RelationSummary {
            relation_type: RelationType::HasReview,
            manifestation_id: pid.to_string(),
            material_types: vec!["Artikel".to_string()],
        }
    }

    #[test]
    fn identical_relations_share_one_index() {
        let mut a = RelationIndexer::default();
        a.add("unit:1", RelationType::HasReview, summary("870976:9"));
        a.add("unit:2", RelationType::HasReview, summary("870976:1"));
        a.add("unit:2", RelationType::HasReview, summary("870976:9"));
        let (global, per_unit) = a.finish();
        assert_eq!(global.len(), 2);
        assert_eq!(global[0].manifestation_id, "870976:1");
        assert_eq!(per_unit["unit:1"][&RelationType::HasReview], vec![1]);
        assert_eq!(per_unit["unit:2"][&RelationType::HasReview], vec![0, 1]);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut a = RelationIndexer::default();
        a.add("unit:1", RelationType::HasReview, summary("870976:1"));
        a.add("unit:2", RelationType::HasReview, summary("870976:2"));
        let mut b = RelationIndexer::default();
        b.add("unit:2", RelationType::HasReview, summary("870976:2"));
        b.add("unit:1", RelationType::HasReview, summary("870976:1"));
        assert_eq!(a.finish(), b.finish());
    }
}
