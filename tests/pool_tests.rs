//! Resource pool under contention: capacity bound, broken-object replacement, blocking waiters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use work_presentation::{PoolError, ResourcePool};

struct Tracked {
    id: usize,
    uses: Arc<AtomicUsize>,
}

#[test]
fn broken_object_is_replaced_and_never_reused() {
    let created = Arc::new(AtomicUsize::new(0));
    let uses_of_two = Arc::new(AtomicUsize::new(0));
    let pool = {
        let created = Arc::clone(&created);
        let uses_of_two = Arc::clone(&uses_of_two);
        ResourcePool::new(3, move || {
            let id = created.fetch_add(1, Ordering::SeqCst) + 1;
            let uses = if id == 2 {
                Arc::clone(&uses_of_two)
            } else {
                Arc::new(AtomicUsize::new(0))
            };
            Ok(Tracked { id, uses })
        })
    };

    let tasks = AtomicUsize::new(12);
    let calls = AtomicUsize::new(0);
    let failures = AtomicUsize::new(0);
    let in_use = AtomicUsize::new(0);
    let max_in_use = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                while tasks
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let result = pool.with_leased(|obj| {
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_use.fetch_max(now, Ordering::SeqCst);
                        obj.uses.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        if obj.id == 2 {
                            Err(PoolError::Broken(format!("object {} poisoned", obj.id)))
                        } else {
                            Ok(obj.id)
                        }
                    });
                    if result.is_err() {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(created.load(Ordering::SeqCst), 4);
    assert_eq!(uses_of_two.load(Ordering::SeqCst), 1);
    assert!(max_in_use.load(Ordering::SeqCst) <= 3);
    let stats = pool.stats();
    assert_eq!(stats.created, 3);
    assert_eq!(stats.idle, 3);
}

#[test]
fn failed_call_returns_object_to_pool() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = {
        let created = Arc::clone(&created);
        ResourcePool::new(1, move || Ok(created.fetch_add(1, Ordering::SeqCst)))
    };
    let err = pool
        .with_leased(|_| Err::<(), _>(PoolError::Failed(anyhow::anyhow!("bad record"))))
        .unwrap_err();
    assert!(!err.is_broken());
    pool.with_leased(|_| Ok(())).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn waiter_blocks_until_object_returns() {
    let pool = Arc::new(ResourcePool::new(1, || Ok(0u32)));
    let holder = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            pool.with_leased(|n| {
                thread::sleep(Duration::from_millis(50));
                *n += 1;
                Ok(())
            })
        })
    };
    thread::sleep(Duration::from_millis(10));
    let seen = pool.with_leased(|n| Ok(*n)).unwrap();
    holder.join().unwrap().unwrap();
    assert_eq!(seen, 1);
}
