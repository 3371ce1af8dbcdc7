//! Job queue contract and an in-process implementation.
//!
//! Entries are `(work id, tracking id)`. With deduplication on, taking a job also takes every
//! other pending (not yet started) job for the same work id, so a burst of updates for one
//! work runs the pipeline once. Duplicates need not be adjacent: `W, X, W` runs `W` once,
//! ahead of `X`, and every run reads the current source state. Failed jobs come back after a
//! postpone delay until they run out of tries, then they are parked in a failed list.

use anyhow::{Result, anyhow};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, error_kind};
use crate::utils::config::Postpone;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueJob {
    pub work_id: String,
    pub tracking_id: String,
    /// Failed runs so far.
    pub attempts: u32,
}

impl QueueJob {
    pub fn new(work_id: &str, tracking_id: &str) -> Self {
        Self {
            work_id: work_id.to_string(),
            tracking_id: tracking_id.to_string(),
            attempts: 0,
        }
    }
}

/// A job that ran out of tries.
#[derive(Clone, Debug)]
pub struct FailedJob {
    pub job: QueueJob,
    pub error: String,
}

/// What the pipeline needs from a queue.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, work_id: &str, tracking_id: &str) -> Result<()>;

    /// Next job, waiting up to `timeout`. `None` on timeout or once the queue is closed and drained.
    fn dequeue(&self, timeout: Duration) -> Result<Option<QueueJob>>;

    /// The job completed.
    fn ack(&self, job: &QueueJob) -> Result<()>;

    /// The job failed as a whole; retry it later or give up on it.
    fn fail(&self, job: QueueJob, err: &anyhow::Error) -> Result<()>;

    /// No new jobs will be accepted. `dequeue` then returns `None` without waiting.
    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub deduplicate: bool,
    pub max_tries: u32,
    pub postpone: Postpone,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            deduplicate: true,
            max_tries: 3,
            postpone: Postpone::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub postponed: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// Pending duplicates dropped by deduplication.
    pub collapsed: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueJob>,
    postponed: Vec<(Instant, QueueJob)>,
    in_progress: usize,
    completed: usize,
    collapsed: usize,
    failed: Vec<FailedJob>,
    closed: bool,
}

impl QueueState {
    /// Move postponed jobs whose time has come to the back of the pending list.
    /// Returns the time the next postponed job is due.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        let mut i = 0;
        while i < self.postponed.len() {
            if self.postponed[i].0 <= now {
                let (_, job) = self.postponed.swap_remove(i);
                self.pending.push_back(job);
            } else {
                i += 1;
            }
        }
        self.postponed.iter().map(|(due, _)| *due).min()
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.postponed.is_empty() && self.in_progress == 0
    }
}

/// In-process queue; state is lost with the process.
pub struct MemoryQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| anyhow!("queue state poisoned"))
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let st = self.lock()?;
        Ok(QueueStats {
            pending: st.pending.len(),
            postponed: st.postponed.len(),
            in_progress: st.in_progress,
            completed: st.completed,
            failed: st.failed.len(),
            collapsed: st.collapsed,
        })
    }

    pub fn failed_jobs(&self) -> Result<Vec<FailedJob>> {
        Ok(self.lock()?.failed.clone())
    }

    /// Stop handing out jobs once the pending ones are gone; wakes all waiters.
    pub fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        self.changed.notify_all();
        Ok(())
    }

    /// Wait until nothing is pending, postponed or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock()?;
        loop {
            if st.is_idle() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .changed
                .wait_timeout(st, deadline - now)
                .map_err(|_| anyhow!("queue state poisoned"))?;
            st = guard;
        }
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, work_id: &str, tracking_id: &str) -> Result<()> {
        let mut st = self.lock()?;
        if st.closed {
            return Err(anyhow!("queue is closed"));
        }
        st.pending.push_back(QueueJob::new(work_id, tracking_id));
        drop(st);
        self.changed.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Result<Option<QueueJob>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock()?;
        loop {
            let now = Instant::now();
            let next_due = st.promote_due(now);
            if let Some(job) = st.pending.pop_front() {
                if self.settings.deduplicate {
                    let before = st.pending.len();
                    st.pending.retain(|j| j.work_id != job.work_id);
                    let dropped = before - st.pending.len();
                    if dropped > 0 {
                        debug!("{}: collapsed {} pending duplicate(s)", job.work_id, dropped);
                        st.collapsed += dropped;
                    }
                }
                st.in_progress += 1;
                return Ok(Some(job));
            }
            if (st.closed && st.postponed.is_empty()) || now >= deadline {
                return Ok(None);
            }
            let wait = next_due.map_or(deadline, |due| due.min(deadline)) - now;
            let (guard, _) = self
                .changed
                .wait_timeout(st, wait)
                .map_err(|_| anyhow!("queue state poisoned"))?;
            st = guard;
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().map_or(true, |st| st.closed)
    }

    fn ack(&self, _job: &QueueJob) -> Result<()> {
        let mut st = self.lock()?;
        st.in_progress = st.in_progress.saturating_sub(1);
        st.completed += 1;
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    fn fail(&self, mut job: QueueJob, err: &anyhow::Error) -> Result<()> {
        job.attempts += 1;
        let kind = error_kind(err);
        let mut st = self.lock()?;
        st.in_progress = st.in_progress.saturating_sub(1);
        if job.attempts >= self.settings.max_tries {
            error!(
                "{} ({}): giving up after {} attempt(s): {:#}",
                job.work_id, job.tracking_id, job.attempts, err
            );
            st.failed.push(FailedJob {
                job,
                error: format!("{err:#}"),
            });
        } else {
            let delay = self.settings.postpone.delay(job.attempts);
            if kind == ErrorKind::Structural {
                error!("{} ({}): {:#}; retrying in {:?}", job.work_id, job.tracking_id, err, delay);
            } else {
                warn!("{} ({}): {:#}; retrying in {:?}", job.work_id, job.tracking_id, err, delay);
            }
            st.postponed.push((Instant::now() + delay, job));
        }
        drop(st);
        self.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_collapses_pending_duplicates() {
        let queue = MemoryQueue::new(QueueSettings::default());
        for i in 0..5 {
            queue.enqueue("work:1", &format!("t{i}")).unwrap();
        }
        queue.enqueue("work:2", "t5").unwrap();
        let first = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.tracking_id, "t0");
        let second = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(second.work_id, "work:2");
        assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());
        assert_eq!(queue.stats().unwrap().collapsed, 4);
    }

    #[test]
    fn dedup_takes_non_adjacent_duplicates_too() {
        let queue = MemoryQueue::new(QueueSettings::default());
        queue.enqueue("work:1", "a").unwrap();
        queue.enqueue("work:2", "b").unwrap();
        queue.enqueue("work:1", "c").unwrap();
        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().unwrap().tracking_id, "a");
        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().unwrap().tracking_id, "b");
        assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());
        assert_eq!(queue.stats().unwrap().collapsed, 1);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let queue = MemoryQueue::new(QueueSettings::default());
        assert!(!queue.is_closed());
        queue.close().unwrap();
        assert!(queue.is_closed());
        assert!(queue.dequeue(Duration::from_secs(5)).unwrap().is_none());
    }

    #[test]
    fn failed_job_is_postponed_then_parked() {
        let queue = MemoryQueue::new(QueueSettings {
            deduplicate: true,
            max_tries: 2,
            postpone: Postpone::new(Duration::from_millis(1), Duration::from_millis(1)),
        });
        queue.enqueue("work:1", "t").unwrap();
        let job = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        queue.fail(job, &anyhow!("boom")).unwrap();
        let retry = queue.dequeue(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(retry.attempts, 1);
        queue.fail(retry, &anyhow!("boom")).unwrap();
        assert!(queue.wait_idle(Duration::from_secs(1)).unwrap());
        let failed = queue.failed_jobs().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.attempts, 2);
    }
}
