//! In-memory snapshot of one work as read from the repository.
//!
//! A tree lives for one job. Nodes are plain ordered maps from child id to child plus the
//! node's own `primary`/`modified` fields, so iteration order (and everything derived from it)
//! is deterministic.

pub mod builder;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::PoolError;
use crate::generator::{COMMON_DATA, ContentGenerator, DUBLIN_CORE, LOCAL_DATA};
use crate::repository::RepositoryClient;
use crate::types::{Content, RelationType, Timestamp, persistent_work_id};

pub use builder::build_work_tree;

/// Lazy reference to one manifestation's content.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentRef {
    pub manifestation_id: String,
    /// Repository object holding the streams.
    pub repository_id: String,
    /// The object's `localData.*` stream this manifestation comes from.
    pub local_stream: String,
    pub source_modified: Timestamp,
    pub deleted: bool,
}

impl FragmentRef {
    /// Raw streams a generator needs, keyed by generator stream name.
    pub fn fetch_streams(&self, client: &dyn RepositoryClient) -> Result<HashMap<String, String>> {
        let mut streams = HashMap::new();
        for (name, stream) in [
            (LOCAL_DATA, self.local_stream.as_str()),
            (COMMON_DATA, COMMON_DATA),
            (DUBLIN_CORE, DUBLIN_CORE),
        ] {
            let content = client
                .data_stream_content(&self.repository_id, stream)
                .with_context(|| format!("fetch {stream} of {}", self.repository_id))?;
            streams.insert(name.to_string(), content);
        }
        Ok(streams)
    }

    /// Produce the content. Only side effect: the repository reads.
    pub fn generate(
        &self,
        client: &dyn RepositoryClient,
        generator: &mut dyn ContentGenerator,
    ) -> Result<Content, PoolError> {
        let streams = self.fetch_streams(client).map_err(PoolError::Failed)?;
        Ok(generator.generate(&self.manifestation_id, &streams)?)
    }
}

/// A relation from a unit to another unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypedRelation {
    pub relation_type: RelationType,
    pub unit_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectTree {
    pub primary: bool,
    pub modified: Timestamp,
    pub fragments: BTreeMap<String, FragmentRef>,
}

impl ObjectTree {
    pub fn active_fragments(&self) -> impl Iterator<Item = &FragmentRef> {
        self.fragments.values().filter(|f| !f.deleted)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnitTree {
    pub primary: bool,
    pub modified: Timestamp,
    pub objects: BTreeMap<String, ObjectTree>,
    pub relations: BTreeSet<TypedRelation>,
}

impl UnitTree {
    pub fn active_fragments(&self) -> impl Iterator<Item = &FragmentRef> {
        self.objects.values().flat_map(|o| o.active_fragments())
    }
}

/// Objects of a unit that some unit of the work relates to.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationTree {
    pub relation_type: RelationType,
    pub objects: BTreeMap<String, ObjectTree>,
}

impl RelationTree {
    pub fn active_fragments(&self) -> impl Iterator<Item = &FragmentRef> {
        self.objects.values().flat_map(|o| o.active_fragments())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkTree {
    pub work_id: String,
    pub modified: Timestamp,
    pub units: BTreeMap<String, UnitTree>,
    pub external_relations: BTreeMap<TypedRelation, RelationTree>,
}

impl WorkTree {
    /// Tree of a deleted work.
    pub fn empty(work_id: &str, modified: Timestamp) -> Self {
        Self {
            work_id: work_id.to_string(),
            modified,
            units: BTreeMap::new(),
            external_relations: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every non-deleted fragment owned by the work's own units.
    pub fn active_fragments(&self) -> impl Iterator<Item = &FragmentRef> {
        self.units.values().flat_map(|u| u.active_fragments())
    }

    /// Ids of all non-deleted fragments in the work's units. Fragments of related units belong
    /// to other works and are not included.
    pub fn extract_manifestation_ids(&self) -> BTreeSet<String> {
        self.active_fragments()
            .map(|f| f.manifestation_id.clone())
            .collect()
    }

    /// Non-deleted fragments of related units.
    pub fn related_fragments(&self) -> impl Iterator<Item = &FragmentRef> {
        self.external_relations
            .values()
            .flat_map(|r| r.active_fragments())
    }

    pub fn primary_unit(&self) -> Option<(&String, &UnitTree)> {
        self.units.iter().find(|(_, u)| u.primary)
    }

    pub fn primary_object(&self) -> Option<(&String, &ObjectTree)> {
        self.primary_unit()?
            .1
            .objects
            .iter()
            .find(|(_, o)| o.primary)
    }

    /// Lowest non-deleted manifestation id of the primary object of the primary unit.
    pub fn primary_manifestation_id(&self) -> Option<&str> {
        self.primary_object()?
            .1
            .active_fragments()
            .map(|f| f.manifestation_id.as_str())
            .next()
    }

    pub fn persistent_work_id(&self) -> Option<String> {
        self.primary_manifestation_id().map(persistent_work_id)
    }

    /// Latest `modified` of the work, its units and their objects.
    pub fn latest_modified(&self) -> Timestamp {
        self.units
            .values()
            .flat_map(|u| std::iter::once(u.modified).chain(u.objects.values().map(|o| o.modified)))
            .fold(self.modified, std::cmp::max)
    }

    /// ASCII rendering, one line per entry.
    pub fn pretty_lines(&self) -> Vec<String> {
        let mut lines = vec![
            self.work_id.clone(),
            format!(" |-- primary: {}", self.primary_manifestation_id().unwrap_or("-")),
            format!(
                " {} modified: {}",
                branch(self.units.is_empty()),
                self.modified.to_rfc3339()
            ),
        ];
        let unit_count = self.units.len();
        for (ui, (unit_id, unit)) in self.units.iter().enumerate() {
            let last_unit = ui + 1 == unit_count;
            let up = if last_unit { "   " } else { "|  " };
            lines.push(format!(" {} {}", branch(last_unit), unit_id));
            lines.push(format!(" {up} |-- primary: {}", unit.primary));
            lines.push(format!(
                " {up} {} modified: {}",
                branch(unit.objects.is_empty() && unit.relations.is_empty()),
                unit.modified.to_rfc3339()
            ));
            for rel in &unit.relations {
                lines.push(format!(" {up} |-- {} -> {}", rel.relation_type, rel.unit_id));
            }
            let object_count = unit.objects.len();
            for (oi, (object_id, obj)) in unit.objects.iter().enumerate() {
                let last_obj = oi + 1 == object_count;
                let op = if last_obj { "   " } else { "|  " };
                lines.push(format!(" {up} {} {}", branch(last_obj), object_id));
                lines.push(format!(" {up} {op} |-- primary: {}", obj.primary));
                lines.push(format!(
                    " {up} {op} {} modified: {}",
                    branch(obj.fragments.is_empty()),
                    obj.modified.to_rfc3339()
                ));
                let fragment_count = obj.fragments.len();
                for (fi, fragment) in obj.fragments.values().enumerate() {
                    lines.push(format!(
                        " {up} {op} {} {}{}",
                        branch(fi + 1 == fragment_count),
                        fragment.manifestation_id,
                        if fragment.deleted { " (deleted)" } else { "" }
                    ));
                }
            }
        }
        lines
    }

    pub fn log_pretty(&self) {
        if log::log_enabled!(log::Level::Trace) {
            for line in self.pretty_lines() {
                log::trace!("{}", line);
            }
        }
    }
}

fn branch(last: bool) -> &'static str {
    if last { "`--" } else { "|--" }
}
