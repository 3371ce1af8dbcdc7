//! Walk the repository from a work id down to its manifestations.

use anyhow::{Context, Result};
use chrono::SubsecRound;
use log::{debug, info};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use super::{FragmentRef, ObjectTree, RelationTree, TypedRelation, UnitTree, WorkTree};
use crate::error::PipelineError;
use crate::repository::{ObjectMetaData, RepositoryClient};
use crate::types::{LOCAL_DATA_PREFIX, manifestation_id};

/// Build the tree for `work_id`.
///
/// An inactive work yields an empty tree. An active parent with an inactive unit or object
/// fails the whole build with [`PipelineError::Inconsistent`]. Relation targets that are
/// inactive are left out.
pub fn build_work_tree(client: &dyn RepositoryClient, work_id: &str) -> Result<WorkTree> {
    let work = meta_data(client, work_id)?;
    let mut tree = WorkTree::empty(work_id, work.modified);
    if !work.active {
        info!("Work {} is inactive", work_id);
        return Ok(tree);
    }
    let rels = client
        .system_relations(work_id)
        .with_context(|| format!("relations of {work_id}"))?;
    for unit_id in &rels.children {
        let unit = build_unit(client, work_id, unit_id)?;
        tree.units.insert(unit_id.clone(), unit);
    }

    let mut related: BTreeMap<String, Option<BTreeMap<String, ObjectTree>>> = BTreeMap::new();
    for (unit_id, unit) in tree.units.iter_mut() {
        for (relation_type, targets) in client.external_relations(unit_id)? {
            for target in targets {
                let objects = match related.entry(target.clone()) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(build_related(client, &target)?),
                };
                let Some(objects) = objects else {
                    debug!("{} {} {}: target inactive, skipped", unit_id, relation_type, target);
                    continue;
                };
                let key = TypedRelation {
                    relation_type,
                    unit_id: target,
                };
                unit.relations.insert(key.clone());
                tree.external_relations
                    .entry(key)
                    .or_insert_with(|| RelationTree {
                        relation_type,
                        objects: objects.clone(),
                    });
            }
        }
    }
    tree.log_pretty();
    Ok(tree)
}

/// Metadata with timestamps cut to the millisecond precision the store keeps.
fn meta_data(client: &dyn RepositoryClient, id: &str) -> Result<ObjectMetaData> {
    let mut meta = client.object_meta_data(id)?;
    meta.created = meta.created.trunc_subsecs(3);
    meta.modified = meta.modified.trunc_subsecs(3);
    Ok(meta)
}

fn active_meta(
    client: &dyn RepositoryClient,
    parent_id: &str,
    id: &str,
) -> Result<ObjectMetaData> {
    let meta = meta_data(client, id)?;
    if !meta.active {
        return Err(PipelineError::Inconsistent(format!(
            "{parent_id} is active but references inactive {id}"
        ))
        .into());
    }
    Ok(meta)
}

fn build_unit(client: &dyn RepositoryClient, work_id: &str, unit_id: &str) -> Result<UnitTree> {
    let meta = active_meta(client, work_id, unit_id)?;
    let rels = client
        .system_relations(unit_id)
        .with_context(|| format!("relations of {unit_id}"))?;
    let mut objects = BTreeMap::new();
    for object_id in &rels.children {
        let object_meta = active_meta(client, unit_id, object_id)?;
        objects.insert(object_id.clone(), build_object(client, object_id, &object_meta)?);
    }
    Ok(UnitTree {
        primary: rels.primary,
        modified: meta.modified,
        objects,
        relations: BTreeSet::new(),
    })
}

/// Objects of a related unit, or `None` if the unit is inactive. Inactive objects are skipped.
fn build_related(
    client: &dyn RepositoryClient,
    unit_id: &str,
) -> Result<Option<BTreeMap<String, ObjectTree>>> {
    if !meta_data(client, unit_id)?.active {
        return Ok(None);
    }
    let rels = client.system_relations(unit_id)?;
    let mut objects = BTreeMap::new();
    for object_id in &rels.children {
        let meta = meta_data(client, object_id)?;
        if !meta.active {
            debug!("Related object {} of {} is inactive", object_id, unit_id);
            continue;
        }
        objects.insert(object_id.clone(), build_object(client, object_id, &meta)?);
    }
    Ok(Some(objects))
}

fn build_object(
    client: &dyn RepositoryClient,
    object_id: &str,
    meta: &ObjectMetaData,
) -> Result<ObjectTree> {
    let rels = client
        .system_relations(object_id)
        .with_context(|| format!("relations of {object_id}"))?;
    let mut fragments = BTreeMap::new();
    for stream in client.data_streams(object_id)? {
        if !stream.starts_with(LOCAL_DATA_PREFIX) {
            continue;
        }
        let Some(mid) = manifestation_id(object_id, &stream) else {
            continue;
        };
        let stream_meta = client.data_stream_meta_data(object_id, &stream)?;
        fragments.insert(
            mid.clone(),
            FragmentRef {
                manifestation_id: mid,
                repository_id: object_id.to_string(),
                local_stream: stream,
                source_modified: meta.modified,
                deleted: !stream_meta.active,
            },
        );
    }
    Ok(ObjectTree {
        primary: rels.primary,
        modified: meta.modified,
        fragments,
    })
}
