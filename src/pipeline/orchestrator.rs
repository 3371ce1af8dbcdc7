use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache_builder::{CacheUpdate, GeneratorPool, ParallelCacheBuilder};
use crate::consolidator::{self, CacheLookup, SaveOutcome};
use crate::generator::{ContentGenerator, DcContentGenerator};
use crate::pipeline::JobContext;
use crate::queue::QueueJob;
use crate::repository::RepositoryClient;
use crate::store;
use crate::tree::build_work_tree;
use crate::types::WORK_ID_PREFIX;
use crate::utils::config::WorkerConfig;
use crate::worker::JobProcessor;

/// What one job did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Not a work id; nothing was done.
    pub skipped: bool,
    pub persistent_work_id: Option<String>,
    pub cache: CacheUpdate,
    /// `None` when the work is gone and its documents were deleted instead.
    pub document: Option<SaveOutcome>,
    pub deleted_documents: usize,
}

/// Turns a work id into a stored [`WorkDocument`](crate::types::WorkDocument).
pub struct PresentationBuilder {
    client: Arc<dyn RepositoryClient>,
    cache_builder: ParallelCacheBuilder,
    db_path: PathBuf,
}

impl PresentationBuilder {
    pub fn new(client: Arc<dyn RepositoryClient>, cache_builder: ParallelCacheBuilder, db_path: &Path) -> Self {
        Self {
            client,
            cache_builder,
            db_path: db_path.to_path_buf(),
        }
    }

    /// Generator pool and executor sized from `config`, generating with [`DcContentGenerator`].
    pub fn from_config(client: Arc<dyn RepositoryClient>, config: &WorkerConfig) -> Result<Self> {
        let generators: GeneratorPool = GeneratorPool::new(config.pool_size, || {
            Ok(Box::new(DcContentGenerator::new()) as Box<dyn ContentGenerator>)
        });
        let cache_builder =
            ParallelCacheBuilder::with_threads(Arc::new(generators), config.executor_threads)?;
        Ok(Self::new(client, cache_builder, &config.db_path))
    }

    pub fn cache_builder(&self) -> &ParallelCacheBuilder {
        &self.cache_builder
    }

    /// Run one job on `conn`.
    pub fn run_job(&self, conn: &mut Connection, job: &QueueJob) -> Result<JobReport> {
        if !job.work_id.starts_with(WORK_ID_PREFIX) {
            info!("Skipping {} ({}): not a work", job.work_id, job.tracking_id);
            return Ok(JobReport {
                skipped: true,
                ..JobReport::default()
            });
        }
        let ctx = JobContext::new(job, self.client.as_ref());
        info!("Processing job: {}", ctx);

        let tree = build_work_tree(&ctx.client, ctx.work_id)
            .with_context(|| format!("build tree of {}", ctx.work_id))?;

        if tree.is_empty() {
            info!("{}: work is gone, removing its content", ctx);
            let removed = self.cache_builder.delete_cache_for_work(conn, ctx.work_id)?;
            let deleted_documents = consolidator::delete_work(conn, ctx.work_id)?;
            return Ok(JobReport {
                cache: CacheUpdate {
                    removed,
                    ..CacheUpdate::default()
                },
                deleted_documents,
                ..JobReport::default()
            });
        }

        let cache = self.cache_builder.update_cache(conn, &ctx.client, &tree)?;
        self.cache_builder.update_work_contains(conn, &tree)?;

        let doc = consolidator::build_work_document(&tree, &CacheLookup::new(conn))?;
        let outcome = consolidator::save_work_document(conn, ctx.work_id, &doc, tree.latest_modified())?;
        debug!(
            "{}: {} written, {} removed, {} current, {} memoized reads",
            ctx,
            cache.written.len(),
            cache.removed.len(),
            cache.up_to_date,
            ctx.client.hits()
        );
        Ok(JobReport {
            skipped: false,
            persistent_work_id: Some(doc.work_id),
            cache,
            document: Some(outcome),
            deleted_documents: 0,
        })
    }
}

impl JobProcessor for PresentationBuilder {
    fn process(&self, job: &QueueJob) -> Result<()> {
        let mut conn = store::open_db(&self.db_path)?;
        self.run_job(&mut conn, job).map(|_| ())
    }
}
