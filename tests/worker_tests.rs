//! Queue worker: deduplication, retries, liveness and a full run against a file database.

mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use work_presentation::queue::{JobQueue, MemoryQueue, QueueSettings};
use work_presentation::store;
use work_presentation::utils::config::Postpone;
use work_presentation::{QueueJob, Worker, WorkerSettings};

fn settings(threads: usize) -> WorkerSettings {
    WorkerSettings {
        threads,
        hung_after: Duration::from_secs(60),
        poll_interval: Duration::from_millis(10),
    }
}

fn count_runs(deduplicate: bool) -> usize {
    let queue = Arc::new(MemoryQueue::new(QueueSettings {
        deduplicate,
        ..QueueSettings::default()
    }));
    for i in 0..5 {
        queue.enqueue("W", &format!("t{i}")).unwrap();
    }
    let runs = Arc::new(AtomicUsize::new(0));
    let processor = {
        let runs = Arc::clone(&runs);
        move |_: &QueueJob| -> anyhow::Result<()> {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };
    let worker = Worker::start(queue.clone(), Arc::new(processor), settings(2)).unwrap();
    assert!(queue.wait_idle(Duration::from_secs(5)).unwrap());
    worker.stop().unwrap();
    runs.load(Ordering::SeqCst)
}

#[test]
fn duplicate_jobs_collapse_only_when_enabled() {
    assert_eq!(count_runs(true), 1);
    assert_eq!(count_runs(false), 5);
}

#[test]
fn failing_job_is_retried_then_parked() {
    let queue = Arc::new(MemoryQueue::new(QueueSettings {
        deduplicate: true,
        max_tries: 3,
        postpone: Postpone::new(Duration::from_millis(5), Duration::from_millis(20)),
    }));
    queue.enqueue("work:bad", "t").unwrap();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let processor = {
        let attempts = Arc::clone(&attempts);
        move |job: &QueueJob| -> anyhow::Result<()> {
            attempts.lock().unwrap().push(job.attempts);
            anyhow::bail!("repository unreachable")
        }
    };
    let worker = Worker::start(queue.clone(), Arc::new(processor), settings(1)).unwrap();
    assert!(queue.wait_idle(Duration::from_secs(5)).unwrap());
    worker.stop().unwrap();

    assert_eq!(*attempts.lock().unwrap(), vec![0, 1, 2]);
    let failed = queue.failed_jobs().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.contains("repository unreachable"));
}

#[test]
fn long_running_job_is_reported_hung() {
    let queue = Arc::new(MemoryQueue::new(QueueSettings::default()));
    queue.enqueue("work:slow", "t-slow").unwrap();
    let processor = |_: &QueueJob| -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    };
    let worker = Worker::start(
        queue.clone(),
        Arc::new(processor),
        WorkerSettings {
            hung_after: Duration::from_millis(50),
            ..settings(1)
        },
    )
    .unwrap();

    thread::sleep(Duration::from_millis(150));
    let hung = worker.hung_jobs();
    assert_eq!(hung.len(), 1);
    assert_eq!(hung[0].work_id, "work:slow");
    assert_eq!(hung[0].tracking_id, "t-slow");
    assert!(!worker.is_healthy());

    assert!(queue.wait_idle(Duration::from_secs(5)).unwrap());
    assert!(worker.hung_jobs().is_empty());
    worker.stop().unwrap();
}

#[test]
fn panicking_job_fails_without_killing_the_thread() {
    let queue = Arc::new(MemoryQueue::new(QueueSettings {
        max_tries: 1,
        ..QueueSettings::default()
    }));
    queue.enqueue("work:panic", "t0").unwrap();
    queue.enqueue("work:fine", "t1").unwrap();
    let processor = |job: &QueueJob| -> anyhow::Result<()> {
        if job.work_id == "work:panic" {
            panic!("generator runtime crashed");
        }
        Ok(())
    };
    let worker = Worker::start(queue.clone(), Arc::new(processor), settings(1)).unwrap();
    assert!(queue.wait_idle(Duration::from_secs(5)).unwrap());
    worker.stop().unwrap();
    let stats = queue.stats().unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
}

/// Counts `dequeue` calls on the wrapped queue.
struct CountingQueue {
    inner: MemoryQueue,
    dequeues: AtomicUsize,
}

impl JobQueue for CountingQueue {
    fn enqueue(&self, work_id: &str, tracking_id: &str) -> anyhow::Result<()> {
        self.inner.enqueue(work_id, tracking_id)
    }

    fn dequeue(&self, timeout: Duration) -> anyhow::Result<Option<QueueJob>> {
        self.dequeues.fetch_add(1, Ordering::SeqCst);
        self.inner.dequeue(timeout)
    }

    fn ack(&self, job: &QueueJob) -> anyhow::Result<()> {
        self.inner.ack(job)
    }

    fn fail(&self, job: QueueJob, err: &anyhow::Error) -> anyhow::Result<()> {
        self.inner.fail(job, err)
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[test]
fn idle_worker_on_closed_queue_polls_at_the_interval() {
    let queue = Arc::new(CountingQueue {
        inner: MemoryQueue::new(QueueSettings::default()),
        dequeues: AtomicUsize::new(0),
    });
    queue.inner.close().unwrap();
    let processor = |_: &QueueJob| -> anyhow::Result<()> { Ok(()) };
    let worker = Worker::start(
        queue.clone(),
        Arc::new(processor),
        WorkerSettings {
            poll_interval: Duration::from_millis(20),
            ..settings(1)
        },
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    worker.stop().unwrap();
    // About ten polls in 200ms; a busy loop would make many thousands.
    assert!(queue.dequeues.load(Ordering::SeqCst) <= 20);
}

#[test]
fn worker_runs_the_pipeline_against_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("presentation.db");
    store::open_db(&db_path).unwrap();

    let repo = scenario_repository();
    let calls = Arc::new(AtomicUsize::new(0));
    let builder = Arc::new(presentation_builder(repo, Arc::clone(&calls), &db_path));
    let queue = Arc::new(MemoryQueue::new(QueueSettings::default()));
    for i in 0..3 {
        queue.enqueue(WORK, &format!("t{i}")).unwrap();
    }
    queue.enqueue(UNIT_1, "t-unit").unwrap();

    let worker = Worker::start(queue.clone() as Arc<dyn JobQueue>, builder, settings(3)).unwrap();
    assert!(queue.wait_idle(Duration::from_secs(10)).unwrap());
    worker.stop().unwrap();

    let stats = queue.stats().unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.completed + stats.collapsed, 4);
    let conn = store::open_db(&db_path).unwrap();
    let doc = store::load_work(&conn, "work-of-870970:1").unwrap().unwrap();
    assert_eq!(doc.value.work_id, "work-of-870970:1");
    assert_eq!(store::cache_ids(&conn).unwrap().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
