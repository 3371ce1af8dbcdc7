//! Per-job context: which job is running, and the memoizing view of the repository it reads through.

use std::fmt;

use crate::queue::QueueJob;
use crate::repository::{MemoizingClient, RepositoryClient};

/// Lives for exactly one job; the request memo goes with it.
pub struct JobContext<'a> {
    pub work_id: &'a str,
    pub tracking_id: &'a str,
    pub client: MemoizingClient<'a>,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a QueueJob, client: &'a dyn RepositoryClient) -> Self {
        Self {
            work_id: &job.work_id,
            tracking_id: &job.tracking_id,
            client: MemoizingClient::new(client),
        }
    }
}

/// `work-id (tracking-id)`, prefixed to per-job log lines.
impl fmt::Display for JobContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.work_id, self.tracking_id)
    }
}
