//! Queue worker: N threads taking jobs from a [`JobQueue`] and handing them to a [`JobProcessor`].
//!
//! Each thread records what it is running and since when, which backs the liveness report
//! ([`Worker::hung_jobs`]).

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::queue::{JobQueue, QueueJob};
use crate::utils::config::Defaults;

/// Runs one job as a unit. An error fails the whole job and hands it back to the queue.
pub trait JobProcessor: Send + Sync {
    fn process(&self, job: &QueueJob) -> Result<()>;
}

impl<F> JobProcessor for F
where
    F: Fn(&QueueJob) -> Result<()> + Send + Sync,
{
    fn process(&self, job: &QueueJob) -> Result<()> {
        self(job)
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub threads: usize,
    /// A job running longer than this is reported as hung.
    pub hung_after: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: Defaults::THREADS,
            hung_after: Defaults::HUNG_AFTER,
            poll_interval: Defaults::POLL_INTERVAL,
        }
    }
}

/// A job that has been running past the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HungJob {
    pub thread: String,
    pub work_id: String,
    pub tracking_id: String,
    pub running_for: Duration,
}

struct InFlight {
    job: QueueJob,
    started: Instant,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

pub struct Worker {
    handles: Vec<JoinHandle<()>>,
    in_flight: InFlightMap,
    stop: Arc<AtomicBool>,
    hung_after: Duration,
}

impl Worker {
    /// Spawn `settings.threads` consumer threads.
    pub fn start(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let in_flight: InFlightMap = Arc::new(Mutex::new(HashMap::new()));
        let threads = settings.threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let name = format!("worker-{i}");
            let queue = Arc::clone(&queue);
            let processor = Arc::clone(&processor);
            let stop = Arc::clone(&stop);
            let in_flight = Arc::clone(&in_flight);
            let poll = settings.poll_interval;
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    consume(&name, queue.as_ref(), processor.as_ref(), &stop, &in_flight, poll)
                })
                .map_err(|e| anyhow!("spawn worker thread: {e}"))?;
            handles.push(handle);
        }
        info!("Started {} worker thread(s)", threads);
        Ok(Self {
            handles,
            in_flight,
            stop,
            hung_after: settings.hung_after,
        })
    }

    /// Flag checked by every thread between jobs; set it to shut down (e.g. from a signal handler).
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Jobs running for longer than the configured threshold.
    pub fn hung_jobs(&self) -> Vec<HungJob> {
        self.jobs_running_longer_than(self.hung_after)
    }

    pub fn jobs_running_longer_than(&self, threshold: Duration) -> Vec<HungJob> {
        let Ok(in_flight) = self.in_flight.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut hung: Vec<HungJob> = in_flight
            .iter()
            .filter_map(|(thread, f)| {
                let running_for = now.duration_since(f.started);
                (running_for > threshold).then(|| HungJob {
                    thread: thread.clone(),
                    work_id: f.job.work_id.clone(),
                    tracking_id: f.job.tracking_id.clone(),
                    running_for,
                })
            })
            .collect();
        hung.sort_by(|a, b| a.thread.cmp(&b.thread));
        hung
    }

    /// Liveness: true while no job is hung.
    pub fn is_healthy(&self) -> bool {
        let hung = self.hung_jobs();
        for h in &hung {
            warn!(
                "{}: {} ({}) running for {:?}",
                h.thread, h.work_id, h.tracking_id, h.running_for
            );
        }
        hung.is_empty()
    }

    /// Ask every thread to stop after its current job and wait for them.
    pub fn stop(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let mut panicked = 0;
        for h in self.handles {
            if h.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{panicked} worker thread(s) panicked"));
        }
        debug!("Worker threads stopped");
        Ok(())
    }
}

fn consume(
    name: &str,
    queue: &dyn JobQueue,
    processor: &dyn JobProcessor,
    stop: &AtomicBool,
    in_flight: &Mutex<HashMap<String, InFlight>>,
    poll: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let job = match queue.dequeue(poll) {
            Ok(Some(job)) => job,
            Ok(None) => {
                if queue.is_closed() {
                    thread::sleep(poll);
                }
                continue;
            }
            Err(e) => {
                error!("{}: dequeue failed: {:#}", name, e);
                thread::sleep(poll);
                continue;
            }
        };
        if let Ok(mut map) = in_flight.lock() {
            map.insert(
                name.to_string(),
                InFlight {
                    job: job.clone(),
                    started: Instant::now(),
                },
            );
        }
        let result = catch_unwind(AssertUnwindSafe(|| processor.process(&job)))
            .unwrap_or_else(|_| Err(anyhow!("job panicked")));
        if let Ok(mut map) = in_flight.lock() {
            map.remove(name);
        }
        let reported = match result {
            Ok(()) => queue.ack(&job),
            Err(e) => queue.fail(job, &e),
        };
        if let Err(e) = reported {
            error!("{}: could not report job outcome: {:#}", name, e);
        }
    }
}
