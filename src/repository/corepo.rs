//! HTTP client for the repository's REST content service.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::collections::BTreeSet;

use super::parse;
use super::{DataStreamMetaData, ExternalRelations, ObjectMetaData, RepositoryClient, SystemRelations};
use crate::error::PipelineError;
use crate::utils::config::Defaults;

pub struct CorepoClient {
    base_url: String,
    http_client: Client,
}

impl CorepoClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(Defaults::HTTP_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// GET `path`; `Ok(None)` on 404.
    fn fetch(&self, path: &str) -> Result<Option<String>> {
        let uri = format!("{}{}", self.base_url, path);
        log::trace!("GET {}", uri);
        let repository_error = |reason: String| PipelineError::Repository {
            uri: uri.clone(),
            reason,
        };
        let response = self
            .http_client
            .get(&uri)
            .send()
            .map_err(|e| repository_error(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(repository_error(format!("status {status}")).into());
        }
        let body = response
            .text()
            .map_err(|e| repository_error(e.to_string()))?;
        Ok(Some(body))
    }

    fn fetch_required(&self, path: &str) -> Result<String> {
        self.fetch(path)?.ok_or_else(|| {
            PipelineError::Repository {
                uri: format!("{}{}", self.base_url, path),
                reason: "not found".to_string(),
            }
            .into()
        })
    }
}

impl RepositoryClient for CorepoClient {
    fn object_meta_data(&self, id: &str) -> Result<ObjectMetaData> {
        let xml = self.fetch_required(&format!("/rest/objects/{id}"))?;
        parse::parse_object_profile(&xml).with_context(|| format!("object profile of {id}"))
    }

    fn system_relations(&self, id: &str) -> Result<SystemRelations> {
        let xml = self.fetch_required(&format!("/rest/objects/{id}/datastreams/RELS-SYS/content"))?;
        parse::parse_rels_sys(&xml).with_context(|| format!("RELS-SYS of {id}"))
    }

    fn external_relations(&self, id: &str) -> Result<ExternalRelations> {
        match self.fetch(&format!("/rest/objects/{id}/datastreams/RELS-EXT/content"))? {
            Some(xml) => parse::parse_rels_ext(&xml).with_context(|| format!("RELS-EXT of {id}")),
            None => Ok(ExternalRelations::new()),
        }
    }

    fn data_streams(&self, id: &str) -> Result<BTreeSet<String>> {
        let xml = self.fetch_required(&format!("/rest/objects/{id}/datastreams"))?;
        parse::parse_datastreams(&xml).with_context(|| format!("datastreams of {id}"))
    }

    fn data_stream_meta_data(&self, id: &str, stream: &str) -> Result<DataStreamMetaData> {
        let xml = self.fetch_required(&format!("/rest/objects/{id}/datastreams/{stream}"))?;
        parse::parse_datastream_profile(&xml).with_context(|| format!("datastream {stream} of {id}"))
    }

    fn data_stream_content(&self, id: &str, stream: &str) -> Result<String> {
        Ok(self
            .fetch(&format!("/rest/objects/{id}/datastreams/{stream}/content"))?
            .unwrap_or_default())
    }
}
