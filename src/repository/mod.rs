//! Read access to the remote content repository: hierarchy, metadata and stream content.

pub mod corepo;
pub mod memo;
pub mod memory;
pub mod parse;

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{RelationType, Timestamp};

pub use corepo::CorepoClient;
pub use memo::MemoizingClient;
pub use memory::MemoryRepository;

/// Object profile of a work, unit or object.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMetaData {
    pub id: String,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub active: bool,
}

/// Position of a node in the work/unit/object hierarchy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SystemRelations {
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub primary: bool,
}

/// Typed relations from a unit to other units.
pub type ExternalRelations = BTreeMap<RelationType, Vec<String>>;

#[derive(Clone, Debug, PartialEq)]
pub struct DataStreamMetaData {
    pub id: String,
    pub created: Timestamp,
    pub active: bool,
}

/// Synchronous, idempotent reads against the repository.
pub trait RepositoryClient: Send + Sync {
    fn object_meta_data(&self, id: &str) -> Result<ObjectMetaData>;

    fn system_relations(&self, id: &str) -> Result<SystemRelations>;

    fn external_relations(&self, id: &str) -> Result<ExternalRelations>;

    fn data_streams(&self, id: &str) -> Result<BTreeSet<String>>;

    fn data_stream_meta_data(&self, id: &str, stream: &str) -> Result<DataStreamMetaData>;

    /// Raw stream content. A stream the object does not have yields an empty string.
    fn data_stream_content(&self, id: &str, stream: &str) -> Result<String>;
}

impl<C: RepositoryClient + ?Sized> RepositoryClient for &C {
    fn object_meta_data(&self, id: &str) -> Result<ObjectMetaData> {
        (**self).object_meta_data(id)
    }

    fn system_relations(&self, id: &str) -> Result<SystemRelations> {
        (**self).system_relations(id)
    }

    fn external_relations(&self, id: &str) -> Result<ExternalRelations> {
        (**self).external_relations(id)
    }

    fn data_streams(&self, id: &str) -> Result<BTreeSet<String>> {
        (**self).data_streams(id)
    }

    fn data_stream_meta_data(&self, id: &str, stream: &str) -> Result<DataStreamMetaData> {
        (**self).data_stream_meta_data(id, stream)
    }

    fn data_stream_content(&self, id: &str, stream: &str) -> Result<String> {
        (**self).data_stream_content(id, stream)
    }
}
