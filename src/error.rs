//! Typed error kinds. Everything else propagates as `anyhow::Error`; callers that need to branch
//! on a kind recover it with `downcast_ref`.

use thiserror::Error;

/// Outcome of a failed [`ResourcePool::with_leased`](crate::pool::ResourcePool::with_leased) call.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The leased object is poisoned; it was destroyed instead of being returned.
    #[error("pooled object is broken: {0}")]
    Broken(String),
    /// The call failed but the object was returned to the pool.
    #[error("{0:#}")]
    Failed(anyhow::Error),
    /// A new pooled object could not be constructed.
    #[error("could not create pooled object: {0:#}")]
    Create(anyhow::Error),
    /// Internal pool state was poisoned by a panicking thread.
    #[error("pool state poisoned")]
    Poisoned,
}

impl PoolError {
    pub fn is_broken(&self) -> bool {
        matches!(self, PoolError::Broken(_))
    }
}

/// Faults raised by a content generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The generator itself is unusable and must be discarded.
    #[error("generator broken: {0}")]
    Broken(String),
    /// The input could not be turned into content; the generator stays usable.
    #[error("generation failed for {manifestation_id}: {reason}")]
    Transient {
        manifestation_id: String,
        reason: String,
    },
}

impl From<GeneratorError> for PoolError {
    fn from(e: GeneratorError) -> Self {
        match e {
            GeneratorError::Broken(msg) => PoolError::Broken(msg),
            other => PoolError::Failed(other.into()),
        }
    }
}

/// Coarse classification used by the queue when logging and retrying failed jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Structural,
    Resource,
    Conflict,
}

/// Job-level failures with a meaning beyond "something went wrong".
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An active parent references an inactive child.
    #[error("inconsistent repository: {0}")]
    Inconsistent(String),
    /// A non-deleted, referenced manifestation has no cache entry.
    #[error("no cached content for referenced manifestation {0}")]
    DanglingReference(String),
    /// An optimistic version check failed; re-read and retry.
    #[error("concurrent update of {0}")]
    Conflict(String),
    /// The remote repository answered with something unusable.
    #[error("repository request {uri} failed: {reason}")]
    Repository { uri: String, reason: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Inconsistent(_) | PipelineError::DanglingReference(_) => {
                ErrorKind::Structural
            }
            PipelineError::Conflict(_) => ErrorKind::Conflict,
            PipelineError::Repository { .. } => ErrorKind::Transient,
        }
    }
}

/// Classify an error chain by the first typed kind found in it.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<PoolError>() {
            return if e.is_broken() {
                ErrorKind::Resource
            } else {
                ErrorKind::Transient
            };
        }
    }
    ErrorKind::Transient
}

/// True if the error chain contains an optimistic-lock conflict.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|c| matches!(c.downcast_ref::<PipelineError>(), Some(PipelineError::Conflict(_))))
}
