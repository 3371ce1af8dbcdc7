//! Per-job request memoization.
//!
//! One job asks for the same documents repeatedly (a unit's relations are read while building
//! the tree and again while resolving other units' relations). A [`MemoizingClient`] is created
//! at job start, handed around by reference, and dropped with the job.

use anyhow::{Result, anyhow};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DataStreamMetaData, ExternalRelations, ObjectMetaData, RepositoryClient, SystemRelations};

#[derive(Clone)]
enum Response {
    Object(ObjectMetaData),
    Relations(SystemRelations),
    External(ExternalRelations),
    Streams(BTreeSet<String>),
    Stream(DataStreamMetaData),
    Content(String),
}

pub struct MemoizingClient<'a> {
    inner: &'a dyn RepositoryClient,
    responses: Mutex<HashMap<String, Response>>,
    hits: AtomicUsize,
}

impl<'a> MemoizingClient<'a> {
    pub fn new(inner: &'a dyn RepositoryClient) -> Self {
        Self {
            inner,
            responses: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
        }
    }

    /// Requests answered from memory so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    fn lookup(&self, key: &str) -> Result<Option<Response>> {
        let responses = self
            .responses
            .lock()
            .map_err(|_| anyhow!("request memo poisoned"))?;
        let found = responses.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    fn remember(&self, key: String, response: Response) -> Result<()> {
        self.responses
            .lock()
            .map_err(|_| anyhow!("request memo poisoned"))?
            .insert(key, response);
        Ok(())
    }
}

/// Answer from memory when the same request was made before, else forward and remember.
macro_rules! memoized {
    ($self:ident, $key:expr, $variant:ident, $fetch:expr) => {{
        let key: String = $key;
        if let Some(Response::$variant(v)) = $self.lookup(&key)? {
            return Ok(v);
        }
        let v = $fetch?;
        $self.remember(key, Response::$variant(v.clone()))?;
        Ok(v)
    }};
}

impl RepositoryClient for MemoizingClient<'_> {
    fn object_meta_data(&self, id: &str) -> Result<ObjectMetaData> {
        memoized!(
            self,
            format!("/rest/objects/{id}"),
            Object,
            self.inner.object_meta_data(id)
        )
    }

    fn system_relations(&self, id: &str) -> Result<SystemRelations> {
        memoized!(
            self,
            format!("/rest/objects/{id}/datastreams/RELS-SYS/content"),
            Relations,
            self.inner.system_relations(id)
        )
    }

    fn external_relations(&self, id: &str) -> Result<ExternalRelations> {
        memoized!(
            self,
            format!("/rest/objects/{id}/datastreams/RELS-EXT/content"),
            External,
            self.inner.external_relations(id)
        )
    }

    fn data_streams(&self, id: &str) -> Result<BTreeSet<String>> {
        memoized!(
            self,
            format!("/rest/objects/{id}/datastreams"),
            Streams,
            self.inner.data_streams(id)
        )
    }

    fn data_stream_meta_data(&self, id: &str, stream: &str) -> Result<DataStreamMetaData> {
        memoized!(
            self,
            format!("/rest/objects/{id}/datastreams/{stream}"),
            Stream,
            self.inner.data_stream_meta_data(id, stream)
        )
    }

    fn data_stream_content(&self, id: &str, stream: &str) -> Result<String> {
        memoized!(
            self,
            format!("/rest/objects/{id}/datastreams/{stream}/content"),
            Content,
            self.inner.data_stream_content(id, stream)
        )
    }
}
