//! Per-name pools of interchangeable unit instances.
//!
//! Each name owns a lock-free MPMC queue. Instances are moved out of the
//! queue on acquire and moved back on release, so a queued instance is never
//! held by two callers at once.

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The factory could not build an instance
    #[error("failed to create an instance of '{name}': {reason}")]
    Factory {
        /// Pooled name
        name: String,
        /// Factory message
        reason: String,
    },

    /// The factory does not know the name
    #[error("no instances can be made for unknown name '{0}'")]
    UnknownName(String),
}

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Instances built per name when a pool is first set up
    pub initial_instances: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { initial_instances: 1 }
    }
}

/// Builds new instances for a pooled name.
pub trait InstanceFactory<T>: Send + Sync {
    /// Build one instance.
    fn create(&self, name: &str) -> Result<T, PoolError>;
}

impl<T, F> InstanceFactory<T> for F
where
    F: Fn(&str) -> Result<T, PoolError> + Send + Sync,
{
    fn create(&self, name: &str) -> Result<T, PoolError> {
        self(name)
    }
}

/// Live-instance bookkeeping, keyed by name.
///
/// Shared between pools when several of them serve the same names.
#[derive(Debug, Default)]
pub struct InstanceCounter {
    counts: DashMap<String, usize>,
}

impl InstanceCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more instance; returns the new count.
    pub fn increment(&self, name: &str) -> usize {
        let mut entry = self.counts.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Count one fewer instance; returns the new count.
    pub fn decrement(&self, name: &str) -> usize {
        match self.counts.get_mut(name) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry
            }
            None => 0,
        }
    }

    /// Current count for a name.
    pub fn count(&self, name: &str) -> usize {
        self.counts.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Sum over all names.
    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| *c.value()).sum()
    }
}

/// Per-name pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Instances waiting in the queue
    pub queued: usize,
    /// Instances ever built by the factory
    pub created: usize,
    /// Instances owned by the pool, queued or handed out
    pub live: usize,
    /// `try_acquire` calls that found the queue empty
    pub misses: usize,
}

struct InstanceQueue<T> {
    queue: SegQueue<T>,
    created: AtomicUsize,
    live: AtomicUsize,
    misses: AtomicUsize,
}

impl<T> InstanceQueue<T> {
    fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            created: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.queue.len(),
            created: self.created.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Pools of interchangeable instances, one queue per name.
pub struct InstancePool<T> {
    factory: Arc<dyn InstanceFactory<T>>,
    counter: Arc<InstanceCounter>,
    queues: DashMap<String, Arc<InstanceQueue<T>>>,
}

impl<T: Send> InstancePool<T> {
    /// Create a pool with its own counter.
    pub fn new(factory: Arc<dyn InstanceFactory<T>>) -> Self {
        Self::with_counter(factory, Arc::new(InstanceCounter::new()))
    }

    /// Create a pool reporting to a shared counter.
    pub fn with_counter(factory: Arc<dyn InstanceFactory<T>>, counter: Arc<InstanceCounter>) -> Self {
        Self {
            factory,
            counter,
            queues: DashMap::new(),
        }
    }

    /// The instance counter.
    pub fn counter(&self) -> &Arc<InstanceCounter> {
        &self.counter
    }

    /// Hand an externally built instance to the pool.
    pub fn register_instance(&self, name: &str, instance: T) {
        let queue = self.queue(name);
        queue.live.fetch_add(1, Ordering::AcqRel);
        self.counter.increment(name);
        queue.queue.push(instance);
        trace!("Registered an instance of {}", name);
    }

    /// Take an instance, building one when the queue is empty.
    ///
    /// Never waits for a release. Concurrent callers facing an empty queue
    /// may each build their own instance.
    pub fn acquire(&self, name: &str) -> Result<T, PoolError> {
        let queue = self.queue(name);
        if let Some(instance) = queue.queue.pop() {
            return Ok(instance);
        }

        let instance = self.factory.create(name)?;
        queue.created.fetch_add(1, Ordering::AcqRel);
        queue.live.fetch_add(1, Ordering::AcqRel);
        let count = self.counter.increment(name);
        debug!("Created instance of {} ({} live)", name, count);
        Ok(instance)
    }

    /// Take a queued instance without building one.
    pub fn try_acquire(&self, name: &str) -> Option<T> {
        let queue = self.queue(name);
        let instance = queue.queue.pop();
        if instance.is_none() {
            let misses = queue.misses.fetch_add(1, Ordering::AcqRel) + 1;
            trace!("No free instance of {} ({} misses)", name, misses);
        }
        instance
    }

    /// Return an instance for reuse.
    ///
    /// An instance released under a name this pool has never seen is
    /// adopted as if it had been registered.
    pub fn release(&self, name: &str, instance: T) {
        if !self.queues.contains_key(name) {
            self.register_instance(name, instance);
            return;
        }
        self.queue(name).queue.push(instance);
    }

    /// Drop an acquired instance instead of returning it.
    pub fn discard(&self, name: &str, instance: T) {
        drop(instance);
        if let Some(queue) = self.queues.get(name) {
            let _ = queue
                .live
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| live.checked_sub(1));
        }
        self.counter.decrement(name);
    }

    /// Acquire an instance that goes back to the pool when dropped.
    pub fn lease(&self, name: &str) -> Result<Lease<'_, T>, PoolError> {
        let instance = self.acquire(name)?;
        Ok(Lease {
            pool: self,
            name: name.to_string(),
            instance: ManuallyDrop::new(instance),
        })
    }

    /// Build instances until `n` are queued for a name.
    pub fn prefill(&self, name: &str, n: usize) -> Result<(), PoolError> {
        let queue = self.queue(name);
        while queue.queue.len() < n {
            let instance = self.factory.create(name)?;
            queue.created.fetch_add(1, Ordering::AcqRel);
            self.register_instance(name, instance);
        }
        debug!("Prefilled {} with {} instances", name, n);
        Ok(())
    }

    /// Drop every queued instance of a name. Returns how many were dropped.
    ///
    /// Instances currently handed out are not affected.
    pub fn drain(&self, name: &str) -> usize {
        self.drain_with(name, drop)
    }

    /// Like [`drain`](Self::drain), handing each instance to `retire` first.
    pub fn drain_with<F>(&self, name: &str, mut retire: F) -> usize
    where
        F: FnMut(T),
    {
        let Some(queue) = self.queues.get(name).map(|q| Arc::clone(q.value())) else {
            return 0;
        };

        let mut drained = 0;
        while let Some(instance) = queue.queue.pop() {
            retire(instance);
            queue.live.fetch_sub(1, Ordering::AcqRel);
            self.counter.decrement(name);
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} instances of {}", drained, name);
        }
        drained
    }

    /// Drain every name.
    pub fn drain_all(&self) -> usize {
        self.names().iter().map(|name| self.drain(name)).sum()
    }

    /// Statistics for a name.
    pub fn stats(&self, name: &str) -> Option<PoolStats> {
        self.queues.get(name).map(|q| q.stats())
    }

    /// Every name that has a queue.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn queue(&self, name: &str) -> Arc<InstanceQueue<T>> {
        if let Some(queue) = self.queues.get(name) {
            return Arc::clone(queue.value());
        }
        let entry = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InstanceQueue::new()));
        Arc::clone(entry.value())
    }
}

impl<T> std::fmt::Debug for InstancePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats: Vec<(String, PoolStats)> = self
            .queues
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect();
        f.debug_struct("InstancePool").field("queues", &stats).finish()
    }
}

/// An acquired instance that is released when dropped.
pub struct Lease<'a, T: Send> {
    pool: &'a InstancePool<T>,
    name: String,
    instance: ManuallyDrop<T>,
}

impl<T: Send> Lease<'_, T> {
    /// Pooled name of the instance.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send> Deref for Lease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.instance
    }
}

impl<T: Send> DerefMut for Lease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.instance
    }
}

impl<T: Send> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `instance` is taken exactly once, here, and never touched again.
        let instance = unsafe { ManuallyDrop::take(&mut self.instance) };
        self.pool.release(&self.name, instance);
    }
}
