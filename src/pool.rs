//! Bounded lease pool for expensive, stateful workers (content generators).
//!
//! Objects are created lazily up to `capacity`. A caller that finds the pool exhausted blocks
//! until another caller returns or invalidates an object. An object reported broken is dropped
//! and its slot freed, so the next borrower constructs a replacement.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::PoolError;

type Factory<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

struct PoolState<T> {
    idle: Vec<T>,
    /// Objects alive right now, idle or leased.
    created: usize,
}

/// Snapshot of pool occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub created: usize,
    pub idle: usize,
}

pub struct ResourcePool<T> {
    factory: Factory<T>,
    capacity: usize,
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

/// Holds a leased object. Dropping it without [`Lease::release`] (i.e. while unwinding) destroys
/// the object, since its state can no longer be trusted.
struct Lease<'a, T> {
    pool: &'a ResourcePool<T>,
    obj: Option<T>,
}

impl<T> Lease<'_, T> {
    fn release(mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.give_back(obj);
        }
    }

    fn destroy(mut self) {
        if self.obj.take().is_some() {
            self.pool.invalidate();
        }
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if self.obj.take().is_some() {
            self.pool.invalidate();
        }
    }
}

impl<T> ResourcePool<T> {
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                created: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.lock();
        PoolStats {
            capacity: self.capacity,
            created: st.created,
            idle: st.idle.len(),
        }
    }

    /// The state stays consistent across a panicking holder: every update is a single push,
    /// pop or counter step.
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow one object, run `f` on it, and settle the lease:
    /// - `Ok(v)`: object returned to the pool, `v` yielded.
    /// - `Err(PoolError::Broken)`: object destroyed, error yielded.
    /// - any other `Err`: object returned to the pool, error yielded.
    ///
    /// Blocks while all `capacity` objects are leased.
    pub fn with_leased<V, F>(&self, f: F) -> Result<V, PoolError>
    where
        F: FnOnce(&mut T) -> Result<V, PoolError>,
    {
        let mut lease = Lease {
            pool: self,
            obj: Some(self.borrow()?),
        };
        let result = match lease.obj.as_mut() {
            Some(obj) => f(obj),
            None => Err(PoolError::Poisoned),
        };
        match &result {
            Err(e) if e.is_broken() => {
                log::debug!("Discarding broken pooled object: {}", e);
                lease.destroy();
            }
            _ => lease.release(),
        }
        result
    }

    fn borrow(&self) -> Result<T, PoolError> {
        let mut st = self.lock();
        loop {
            if let Some(obj) = st.idle.pop() {
                return Ok(obj);
            }
            if st.created < self.capacity {
                st.created += 1;
                drop(st);
                return match (self.factory)() {
                    Ok(obj) => Ok(obj),
                    Err(e) => {
                        self.invalidate();
                        Err(PoolError::Create(e))
                    }
                };
            }
            st = self
                .available
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn give_back(&self, obj: T) {
        self.lock().idle.push(obj);
        self.available.notify_one();
    }

    fn invalidate(&self) {
        let mut st = self.lock();
        st.created = st.created.saturating_sub(1);
        drop(st);
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn creates_lazily_and_reuses() {
        let made = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&made);
        let pool = ResourcePool::new(2, move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(pool.stats().created, 0);
        for _ in 0..5 {
            pool.with_leased(|_| Ok(())).unwrap();
        }
        assert_eq!(made.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn failed_create_frees_slot() {
        let pool: ResourcePool<u32> = ResourcePool::new(1, || Err(anyhow::anyhow!("no runtime")));
        let err = pool.with_leased(|_| Ok(())).unwrap_err();
        assert!(matches!(err, PoolError::Create(_)));
        assert_eq!(pool.stats().created, 0);
    }

    #[test]
    fn poisoned_state_keeps_its_slots() {
        let pool = std::sync::Arc::new(ResourcePool::new(1, || Ok(0u32)));
        let holder = std::sync::Arc::clone(&pool);
        let _ = std::thread::spawn(move || {
            let _st = holder.state.lock().unwrap();
            panic!("holder died");
        })
        .join();
        assert!(pool.state.is_poisoned());

        pool.with_leased(|v| {
            *v += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.with_leased(|v| Ok(*v)).unwrap(), 1);
        let err = pool
            .with_leased(|_| Err::<(), _>(PoolError::Broken("crashed".into())))
            .unwrap_err();
        assert!(err.is_broken());
        assert_eq!(pool.stats().created, 0);
        assert_eq!(pool.with_leased(|v| Ok(*v)).unwrap(), 0);
        assert_eq!(pool.stats().created, 1);
    }
}
