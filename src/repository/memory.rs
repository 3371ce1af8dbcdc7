//! In-process repository, for tests and offline runs.

use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DataStreamMetaData, ExternalRelations, ObjectMetaData, RepositoryClient, SystemRelations};
use crate::types::{RelationType, Timestamp};

#[derive(Clone, Debug)]
struct MemoryStream {
    created: Timestamp,
    active: bool,
    content: String,
}

#[derive(Clone, Debug)]
struct MemoryObject {
    meta: ObjectMetaData,
    rels: SystemRelations,
    external: ExternalRelations,
    streams: BTreeMap<String, MemoryStream>,
}

/// Repository kept in memory. Mutations are visible to subsequent reads, so a test can change
/// the source between pipeline runs.
#[derive(Default)]
pub struct MemoryRepository {
    objects: RwLock<HashMap<String, MemoryObject>>,
    requests: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads served.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<String, MemoryObject>) -> R) -> R {
        match self.objects.write() {
            Ok(mut objects) => f(&mut objects),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn read<R>(&self, id: &str, f: impl FnOnce(&MemoryObject) -> R) -> Result<R> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("memory repository poisoned"))?;
        let obj = objects
            .get(id)
            .ok_or_else(|| anyhow!("no such object: {id}"))?;
        Ok(f(obj))
    }

    fn insert(&self, id: &str, parent: Option<&str>, primary: bool, modified: Timestamp) {
        self.write(|objects| {
            objects.insert(
                id.to_string(),
                MemoryObject {
                    meta: ObjectMetaData {
                        id: id.to_string(),
                        created: modified,
                        modified,
                        active: true,
                    },
                    rels: SystemRelations {
                        id: id.to_string(),
                        parent: parent.map(str::to_string),
                        children: Vec::new(),
                        primary,
                    },
                    external: ExternalRelations::new(),
                    streams: BTreeMap::new(),
                },
            );
            if let Some(parent) = parent
                && let Some(p) = objects.get_mut(parent)
                && !p.rels.children.iter().any(|c| c == id)
            {
                p.rels.children.push(id.to_string());
            }
        });
    }

    pub fn add_work(&self, work_id: &str, modified: Timestamp) {
        self.insert(work_id, None, true, modified);
    }

    pub fn add_unit(&self, work_id: &str, unit_id: &str, primary: bool, modified: Timestamp) {
        self.insert(unit_id, Some(work_id), primary, modified);
    }

    pub fn add_object(&self, unit_id: &str, object_id: &str, primary: bool, modified: Timestamp) {
        self.insert(object_id, Some(unit_id), primary, modified);
    }

    /// Add or replace an active stream on an object.
    pub fn put_stream(&self, object_id: &str, stream: &str, content: &str) {
        self.write(|objects| {
            if let Some(obj) = objects.get_mut(object_id) {
                obj.streams.insert(
                    stream.to_string(),
                    MemoryStream {
                        created: obj.meta.modified,
                        active: true,
                        content: content.to_string(),
                    },
                );
            }
        });
    }

    pub fn set_stream_active(&self, object_id: &str, stream: &str, active: bool) {
        self.write(|objects| {
            if let Some(s) = objects
                .get_mut(object_id)
                .and_then(|o| o.streams.get_mut(stream))
            {
                s.active = active;
            }
        });
    }

    pub fn set_active(&self, id: &str, active: bool) {
        self.write(|objects| {
            if let Some(o) = objects.get_mut(id) {
                o.meta.active = active;
            }
        });
    }

    pub fn set_modified(&self, id: &str, modified: Timestamp) {
        self.write(|objects| {
            if let Some(o) = objects.get_mut(id) {
                o.meta.modified = modified;
            }
        });
    }

    pub fn add_relation(&self, unit_id: &str, relation_type: RelationType, target: &str) {
        self.write(|objects| {
            if let Some(o) = objects.get_mut(unit_id) {
                o.external
                    .entry(relation_type)
                    .or_default()
                    .push(target.to_string());
            }
        });
    }

    /// Detach `child` from `parent` and drop it.
    pub fn remove(&self, parent: &str, child: &str) {
        self.write(|objects| {
            if let Some(p) = objects.get_mut(parent) {
                p.rels.children.retain(|c| c != child);
            }
            objects.remove(child);
        });
    }
}

impl RepositoryClient for MemoryRepository {
    fn object_meta_data(&self, id: &str) -> Result<ObjectMetaData> {
        self.read(id, |o| o.meta.clone())
    }

    fn system_relations(&self, id: &str) -> Result<SystemRelations> {
        self.read(id, |o| o.rels.clone())
    }

    fn external_relations(&self, id: &str) -> Result<ExternalRelations> {
        self.read(id, |o| o.external.clone())
    }

    fn data_streams(&self, id: &str) -> Result<BTreeSet<String>> {
        self.read(id, |o| o.streams.keys().cloned().collect())
    }

    fn data_stream_meta_data(&self, id: &str, stream: &str) -> Result<DataStreamMetaData> {
        self.read(id, |o| {
            o.streams.get(stream).map(|s| DataStreamMetaData {
                id: id.to_string(),
                created: s.created,
                active: s.active,
            })
        })?
        .ok_or_else(|| anyhow!("no stream {stream} on {id}"))
    }

    fn data_stream_content(&self, id: &str, stream: &str) -> Result<String> {
        self.read(id, |o| {
            o.streams
                .get(stream)
                .map(|s| s.content.clone())
                .unwrap_or_default()
        })
    }
}
