//! Reusable resource pool.
//!
//! A [`ResourcePool`] hands out instances of helper objects that are expensive to build
//! and not safe to share between threads (stateful scanners, scratch buffers). Instances
//! are checked out with [`ResourcePool::acquire`] and returned either explicitly with
//! [`ResourcePool::release`] or implicitly when the [`Pooled`] guard is dropped.
//!
//! Reuse is last-in-first-out: the most recently returned instance is handed out next.
//! When the free list is empty a fresh instance is built with the factory, so checking
//! out never waits for another thread to return something. The pool has no upper bound
//! and never evicts idle instances.

use crate::engine::errors::PoolError;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Counters describing the pool at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances sitting in the free list
    pub idle: usize,
    /// Instances currently handed out
    pub checked_out: usize,
    /// Instances built by the factory over the lifetime of the pool
    pub created: usize,
}

struct FreeList<T> {
    items: Vec<(u64, T)>,
    checked_out: usize,
}

struct PoolInner<T> {
    id: u64,
    factory: Factory<T>,
    free: Mutex<FreeList<T>>,
    created: AtomicUsize,
    next_resource: AtomicU64,
}

impl<T> PoolInner<T> {
    fn free_list(&self) -> MutexGuard<'_, FreeList<T>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(&self, resource: u64, value: T) {
        let mut free = self.free_list();
        free.checked_out = free.checked_out.saturating_sub(1);
        free.items.push((resource, value));
    }
}

/// Thread-safe LIFO pool of `T` instances.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.inner.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Creates an empty pool. `factory` is called whenever a checkout finds the free list empty.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                factory: Box::new(factory),
                free: Mutex::new(FreeList {
                    items: Vec::new(),
                    checked_out: 0,
                }),
                created: AtomicUsize::new(0),
                next_resource: AtomicU64::new(1),
            }),
        }
    }
}

impl<T> ResourcePool<T> {
    /// Checks out an instance. Never waits: a miss builds a new instance.
    pub fn acquire(&self) -> Pooled<T> {
        let recycled = {
            let mut free = self.inner.free_list();
            free.checked_out += 1;
            free.items.pop()
        };

        // The factory runs outside the lock so slow constructors do not serialize checkouts.
        let (resource, value) = match recycled {
            Some(entry) => entry,
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                let resource = self.inner.next_resource.fetch_add(1, Ordering::Relaxed);
                (resource, (self.inner.factory)())
            }
        };

        Pooled {
            value: Some(value),
            resource,
            pool: self.inner.clone(),
        }
    }

    /// Returns an instance to this pool.
    ///
    /// A guard checked out from a different pool is rejected with [`PoolError::ForeignResource`];
    /// it then goes back to the pool it came from when dropped.
    pub fn release(&self, pooled: Pooled<T>) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&self.inner, &pooled.pool) {
            return Err(PoolError::ForeignResource {
                resource: pooled.resource,
                owner: pooled.pool.id,
                pool: self.inner.id,
            });
        }

        drop(pooled);
        Ok(())
    }

    /// Runs `f` with a checked-out instance and returns it afterwards, also on unwinding.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut pooled = self.acquire();
        f(&mut pooled)
    }

    /// Identifier of this pool, used in [`PoolError`] messages.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.inner.free_list();
        PoolStats {
            idle: free.items.len(),
            checked_out: free.checked_out,
            created: self.inner.created.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out pool instance. Returned to its pool exactly once, on release or drop.
pub struct Pooled<T> {
    value: Option<T>,
    resource: u64,
    pool: Arc<PoolInner<T>>,
}

impl<T> Pooled<T> {
    /// Pool-local identity of the checked-out instance. Stable across checkouts.
    pub fn resource_id(&self) -> u64 {
        self.resource
    }

    /// Returns the instance to the pool it was checked out from.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.value.as_ref() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on drop"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.value.as_mut() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on drop"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put_back(self.resource, value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("resource", &self.resource)
            .field("pool", &self.pool.id)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Scratch {
        busy: AtomicBool,
        buf: Vec<u8>,
    }

    #[test]
    fn nested_acquisitions_yield_distinct_instances() {
        let pool = ResourcePool::new(Scratch::default);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.resource_id(), b.resource_id());

        let stats = pool.stats();
        assert_eq!(stats.checked_out, 2);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn reuse_is_last_in_first_out() {
        let pool = ResourcePool::new(Scratch::default);

        let a = pool.acquire();
        let b = pool.acquire();
        let (id_a, id_b) = (a.resource_id(), b.resource_id());

        pool.release(a).unwrap();
        pool.release(b).unwrap();

        // b went back last, so it comes out first
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!(first.resource_id(), id_b);
        assert_eq!(second.resource_id(), id_a);
        assert_eq!(pool.stats().created, 2);
    }

    #[test]
    fn released_instance_keeps_its_state() {
        let pool = ResourcePool::new(Scratch::default);

        let mut a = pool.acquire();
        a.buf.extend_from_slice(b"hello");
        let id = a.resource_id();
        drop(a);

        let again = pool.acquire();
        assert_eq!(again.resource_id(), id);
        assert_eq!(again.buf, b"hello");
    }

    #[test]
    fn foreign_release_is_rejected() {
        let pool_a = ResourcePool::new(Scratch::default);
        let pool_b = ResourcePool::new(Scratch::default);

        let from_a = pool_a.acquire();
        let err = pool_b.release(from_a).unwrap_err();
        assert!(matches!(
            err,
            PoolError::ForeignResource { owner, pool, .. } if owner == pool_a.id() && pool == pool_b.id()
        ));

        // The rejected guard went home on drop
        assert_eq!(pool_a.stats().idle, 1);
        assert_eq!(pool_a.stats().checked_out, 0);
        assert_eq!(pool_b.stats().idle, 0);
    }

    #[test]
    fn with_returns_instance_after_use() {
        let pool = ResourcePool::new(Scratch::default);
        let len = pool.with(|s| {
            s.buf.push(1);
            s.buf.len()
        });
        assert_eq!(len, 1);
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[test]
    fn stress_many_threads_never_alias() {
        const THREADS: usize = 24;
        const CYCLES: usize = 20_000;

        let pool = ResourcePool::new(Scratch::default);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let pool = pool.clone();
                scope.spawn(move || {
                    for i in 0..CYCLES {
                        let outer = pool.acquire();
                        assert!(!outer.busy.swap(true, Ordering::SeqCst), "instance handed out twice");

                        if i % 3 == 0 {
                            let inner = pool.acquire();
                            assert!(!inner.busy.swap(true, Ordering::SeqCst), "instance handed out twice");
                            assert_ne!(inner.resource_id(), outer.resource_id());
                            inner.busy.store(false, Ordering::SeqCst);
                            pool.release(inner).unwrap();
                        }

                        outer.busy.store(false, Ordering::SeqCst);
                        pool.release(outer).unwrap();
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.idle, stats.created);
        // Worst case is one instance per concurrent checkout
        assert!(stats.created <= THREADS * 2);

        let ids: HashSet<u64> = (0..stats.idle)
            .map(|_| {
                let pooled = pool.acquire();
                let id = pooled.resource_id();
                std::mem::forget(pooled);
                id
            })
            .collect();
        assert_eq!(ids.len(), stats.idle);
    }
}
