//! Work presentation: turns works held in a bibliographic content repository into consolidated,
//! presentation-ready documents.
//!
//! One job per work id: [`tree::build_work_tree`] reads the work's hierarchy, the
//! [`cache_builder::ParallelCacheBuilder`] refreshes per-manifestation content through a bounded
//! [`pool::ResourcePool`] of generators, and the [`consolidator`] merges it into a
//! [`types::WorkDocument`]. The [`worker::Worker`] runs jobs from a [`queue::JobQueue`].

pub mod cache_builder;
pub mod consolidator;
pub mod engine;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod repository;
pub mod store;
pub mod tree;
pub mod types;
pub mod utils;
pub mod worker;

/// Re-export types for API
pub use types::*;

pub use cache_builder::{CacheUpdate, GeneratorPool, ParallelCacheBuilder};
pub use consolidator::{SaveOutcome, build_work_document, save_work_document};
pub use error::{ErrorKind, GeneratorError, PipelineError, PoolError};
pub use pipeline::{JobReport, PresentationBuilder};
pub use pool::ResourcePool;
pub use queue::{JobQueue, MemoryQueue, QueueJob, QueueSettings};
pub use repository::RepositoryClient;
pub use tree::{WorkTree, build_work_tree};
pub use worker::{JobProcessor, Worker, WorkerSettings};

/// Result alias used by the public API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
