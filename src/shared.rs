//! The bounded, keyed multi-resource tier
//!
//! Manages the reader connections: a capacity-bounded collection of keyed
//! resources supporting keyed and any-available acquisition. Returns hand off
//! directly to the longest-waiting matching borrower; at capacity, the oldest
//! idle resource of another key is traded for the requested one instead of
//! blocking.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{Priority, should_evict};
use crate::factory::ResourceFactory;
use crate::health::HealthStatus;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};
use crate::resource::Lease;
use crate::wait::WaitQueue;

/// Bounded pool of keyed resources.
pub struct SharedPool<F: ResourceFactory> {
    inner: Arc<SharedInner<F>>,
}

pub(crate) struct SharedInner<F: ResourceFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    state: Mutex<SharedState<F>>,
    available: Condvar,
    active: DashMap<u64, Option<F::Key>>,
    metrics: MetricsTracker,
    ids: AtomicU64,
}

struct SharedState<F: ResourceFactory> {
    idle: HashMap<Option<F::Key>, VecDeque<IdleEntry<F::Resource>>>,
    // borrowed + idle + reserved slots; never exceeds the configured capacity
    live: usize,
    closed: bool,
    queue: WaitQueue<F::Key, SharedGrant<F>>,
}

struct IdleEntry<T> {
    id: u64,
    resource: T,
    since: Instant,
}

enum SharedGrant<F: ResourceFactory> {
    /// A returned resource reserved for one specific waiter.
    Ready {
        entry: IdleEntry<F::Resource>,
        key: Option<F::Key>,
    },
    /// A freed capacity slot; the waiter creates for its own key.
    Permit,
}

/// Outcome of the non-blocking acquisition steps, taken under the pool lock.
enum FastPath<F: ResourceFactory> {
    Admit(Option<F::Key>, IdleEntry<F::Resource>),
    Reserve,
    Trade(Option<F::Key>, IdleEntry<F::Resource>),
}

impl<F: ResourceFactory> SharedState<F> {
    fn take_idle(&mut self, want: Option<&F::Key>) -> Option<(Option<F::Key>, IdleEntry<F::Resource>)> {
        let map_key = match want {
            Some(k) => {
                let mk = Some(k.clone());
                if !self.idle.contains_key(&mk) {
                    return None;
                }
                mk
            }
            None => {
                // most recently returned across all keys, for cache warmth
                let (mk, _) = self
                    .idle
                    .iter()
                    .filter_map(|(k, dq)| dq.back().map(|e| (k.clone(), e.since)))
                    .max_by_key(|(_, since)| *since)?;
                mk
            }
        };
        let dq = self.idle.get_mut(&map_key)?;
        let entry = dq.pop_back()?;
        if dq.is_empty() {
            self.idle.remove(&map_key);
        }
        Some((map_key, entry))
    }

    fn take_oldest_idle(&mut self) -> Option<(Option<F::Key>, IdleEntry<F::Resource>)> {
        let (map_key, _) = self
            .idle
            .iter()
            .filter_map(|(k, dq)| dq.front().map(|e| (k.clone(), e.since)))
            .min_by_key(|(_, since)| *since)?;
        let dq = self.idle.get_mut(&map_key)?;
        let entry = dq.pop_front()?;
        if dq.is_empty() {
            self.idle.remove(&map_key);
        }
        Some((map_key, entry))
    }
}

impl<F: ResourceFactory> SharedPool<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                factory,
                config,
                state: Mutex::new(SharedState {
                    idle: HashMap::new(),
                    live: 0,
                    closed: false,
                    queue: WaitQueue::new(),
                }),
                available: Condvar::new(),
                active: DashMap::new(),
                metrics: MetricsTracker::new(),
                ids: AtomicU64::new(0),
            }),
        }
    }

    /// Borrow a resource for `key`, waiting up to the configured timeout.
    ///
    /// Prefers a same-key idle resource, then creation under capacity, then
    /// trading the oldest idle resource of another key; blocks only when
    /// every live resource is borrowed.
    pub fn borrow(&self, key: &F::Key) -> PoolResult<Lease<F>> {
        self.borrow_deadline(Some(key), self.inner.config.borrow_timeout)
    }

    /// Keyed borrow with an explicit deadline.
    pub fn borrow_timeout(&self, key: &F::Key, timeout: Duration) -> PoolResult<Lease<F>> {
        self.borrow_deadline(Some(key), Some(timeout))
    }

    /// Borrow any available resource regardless of key.
    pub fn borrow_any(&self) -> PoolResult<Lease<F>> {
        self.borrow_deadline(None, self.inner.config.borrow_timeout)
    }

    /// Unkeyed borrow with an explicit deadline.
    pub fn borrow_any_timeout(&self, timeout: Duration) -> PoolResult<Lease<F>> {
        self.borrow_deadline(None, Some(timeout))
    }

    /// Keyed borrow without waiting. `Ok(None)` means every slot is on loan.
    pub fn try_borrow(&self, key: &F::Key) -> PoolResult<Option<Lease<F>>> {
        self.try_acquire(Some(key))
    }

    /// Unkeyed borrow without waiting.
    pub fn try_borrow_any(&self) -> PoolResult<Option<Lease<F>>> {
        self.try_acquire(None)
    }

    fn try_acquire(&self, want: Option<&F::Key>) -> PoolResult<Option<Lease<F>>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        match self.fast_path(&mut state, want) {
            Some(path) => self.finish_fast(state, path, want).map(Some),
            None => Ok(None),
        }
    }

    fn borrow_deadline(
        &self,
        want: Option<&F::Key>,
        timeout: Option<Duration>,
    ) -> PoolResult<Lease<F>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(path) = self.fast_path(&mut state, want) {
            return self.finish_fast(state, path, want);
        }
        let ticket = state.queue.enqueue(want.cloned());
        loop {
            if let Some(grant) = state.queue.take_grant(ticket) {
                return self.serve_grant(state, grant, want);
            }
            if state.closed {
                state.queue.cancel(ticket);
                return Err(PoolError::Closed);
            }
            let timed_out = match deadline {
                Some(d) => inner.available.wait_until(&mut state, d).timed_out(),
                None => {
                    inner.available.wait(&mut state);
                    false
                }
            };
            if timed_out {
                // a grant that raced in just before the deadline is still served
                return match state.queue.cancel(ticket) {
                    Some(grant) => self.serve_grant(state, grant, want),
                    None => {
                        inner.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                        Err(PoolError::Timeout(timeout.unwrap_or_default()))
                    }
                };
            }
        }
    }

    fn fast_path(
        &self,
        state: &mut SharedState<F>,
        want: Option<&F::Key>,
    ) -> Option<FastPath<F>> {
        if let Some((key, entry)) = state.take_idle(want) {
            return Some(FastPath::Admit(key, entry));
        }
        if state.live < self.inner.config.capacity {
            state.live += 1;
            return Some(FastPath::Reserve);
        }
        if let Some((key, entry)) = state.take_oldest_idle() {
            return Some(FastPath::Trade(key, entry));
        }
        None
    }

    fn finish_fast(
        &self,
        state: MutexGuard<'_, SharedState<F>>,
        path: FastPath<F>,
        want: Option<&F::Key>,
    ) -> PoolResult<Lease<F>> {
        match path {
            FastPath::Admit(key, entry) => Ok(self.admit(entry, key)),
            FastPath::Reserve => {
                drop(state);
                self.create_reserved(want.cloned())
            }
            FastPath::Trade(key, entry) => {
                drop(state);
                debug!(key = ?key, id = entry.id, "evicting idle resource to make room");
                self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                self.inner.destroy_quiet(entry.resource);
                self.create_reserved(want.cloned())
            }
        }
    }

    fn serve_grant(
        &self,
        mut state: MutexGuard<'_, SharedState<F>>,
        grant: SharedGrant<F>,
        want: Option<&F::Key>,
    ) -> PoolResult<Lease<F>> {
        match grant {
            SharedGrant::Ready { entry, key } => Ok(self.admit(entry, key)),
            SharedGrant::Permit => {
                if state.closed {
                    state.live -= 1;
                    return Err(PoolError::Closed);
                }
                drop(state);
                self.create_reserved(want.cloned())
            }
        }
    }

    fn admit(&self, entry: IdleEntry<F::Resource>, key: Option<F::Key>) -> Lease<F> {
        self.inner.active.insert(entry.id, key.clone());
        self.inner.metrics.borrows.fetch_add(1, Ordering::Relaxed);
        Lease::secondary(entry.id, entry.resource, key, Arc::downgrade(&self.inner))
    }

    /// Create with the live slot already reserved; a failure frees the slot
    /// for the next waiter so a doomed factory cannot starve the queue.
    fn create_reserved(&self, key: Option<F::Key>) -> PoolResult<Lease<F>> {
        let inner = &self.inner;
        let id = inner.ids.fetch_add(1, Ordering::Relaxed);
        match inner.factory.create(key.as_ref()) {
            Ok(resource) => {
                inner.active.insert(id, key.clone());
                inner.metrics.created.fetch_add(1, Ordering::Relaxed);
                inner.metrics.borrows.fetch_add(1, Ordering::Relaxed);
                debug!(id, key = ?key, "created shared resource");
                Ok(Lease::secondary(id, resource, key, Arc::downgrade(&self.inner)))
            }
            Err(e) => {
                let mut state = inner.state.lock();
                inner.release_slot(&mut state);
                drop(state);
                warn!(error = %e, key = ?key, "shared resource creation failed");
                Err(PoolError::Factory(e))
            }
        }
    }

    /// Return a borrowed resource.
    ///
    /// The factory's validation hook decides whether the resource re-enters
    /// the idle set; an invalid resource is destroyed and its slot freed.
    pub fn give_back(&self, mut lease: Lease<F>) -> PoolResult<()> {
        let Some(value) = lease.take_value() else {
            return Err(PoolError::AlreadyReleased);
        };
        if !lease.owned_by_shared(&self.inner) {
            lease.restore(value);
            return Err(PoolError::ForeignResource);
        }
        self.inner.repay(lease.id(), value)
    }

    /// Destroy idle resources past the priority threshold, oldest first.
    /// Borrowed resources are untouched and eviction never blocks a borrow
    /// for longer than the bookkeeping takes.
    pub fn clear(&self, priority: Priority) {
        let grace = self.inner.config.idle_grace;
        let mut victims = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let keys: Vec<Option<F::Key>> = state.idle.keys().cloned().collect();
            for map_key in keys {
                let Some(dq) = state.idle.get_mut(&map_key) else {
                    continue;
                };
                while dq
                    .front()
                    .is_some_and(|e| should_evict(priority, e.since.elapsed(), grace))
                {
                    if let Some(entry) = dq.pop_front() {
                        victims.push(entry);
                    }
                }
                if dq.is_empty() {
                    state.idle.remove(&map_key);
                }
            }
            state.live -= victims.len();
        }
        for entry in victims {
            self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            self.inner.destroy_quiet(entry.resource);
        }
    }

    /// Close the pool: destroy all idle resources and mark the pool so
    /// borrowed resources are destroyed on return. Never blocks on borrowers.
    pub fn close(&self) -> PoolResult<()> {
        let inner = &self.inner;
        let mut victims = Vec::new();
        {
            let mut state = inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            debug!(waiters = state.queue.len(), live = state.live, "closing shared tier");
            for (_, dq) in state.idle.drain() {
                victims.extend(dq);
            }
            for grant in state.queue.drain() {
                match grant {
                    SharedGrant::Ready { entry, .. } => victims.push(entry),
                    SharedGrant::Permit => state.live -= 1,
                }
            }
            state.live -= victims.len();
            inner.available.notify_all();
        }
        let mut failures = Vec::new();
        for entry in victims {
            match inner.factory.destroy(entry.resource) {
                Ok(()) => {
                    inner.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => failures.push(e),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Teardown(failures))
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.values().map(|dq| dq.len()).sum()
    }

    pub fn borrowed_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn live_count(&self) -> usize {
        self.inner.state.lock().live
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.idle_count();
        self.inner
            .metrics
            .snapshot(self.inner.active.len(), idle, self.inner.config.capacity)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::evaluate(&self.metrics())
    }

    /// Export this tier's metrics in Prometheus exposition format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }
}

impl<F: ResourceFactory> Clone for SharedPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> SharedInner<F> {
    pub(crate) fn repay(&self, id: u64, resource: F::Resource) -> PoolResult<()> {
        let Some((_, key)) = self.active.remove(&id) else {
            return Err(PoolError::AlreadyReleased);
        };
        self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        // the resource is exclusively ours here, so validation runs unlocked
        let valid = !self.config.validate_on_return || self.factory.validate(&resource);
        let mut state = self.state.lock();
        if state.closed {
            state.live -= 1;
            drop(state);
            self.destroy_quiet(resource);
            return Ok(());
        }
        if !valid {
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            warn!(id, key = ?key, "resource failed validation on return");
            self.release_slot(&mut state);
            drop(state);
            self.destroy_quiet(resource);
            return Ok(());
        }
        let entry = IdleEntry {
            id,
            resource,
            since: Instant::now(),
        };
        let victim = self.hand_off_or_park(&mut state, key, entry);
        drop(state);
        if let Some(victim) = victim {
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            self.destroy_quiet(victim.resource);
        }
        Ok(())
    }

    /// Deliver a returned resource to the first same-key waiter, else the
    /// first unkeyed waiter, else park it idle. With only foreign-key waiters
    /// queued, the resource is traded for a capacity permit instead; the
    /// caller destroys the returned victim.
    fn hand_off_or_park(
        &self,
        state: &mut SharedState<F>,
        key: Option<F::Key>,
        entry: IdleEntry<F::Resource>,
    ) -> Option<IdleEntry<F::Resource>> {
        let pkey = key.clone();
        let grant = SharedGrant::Ready { entry, key };
        let grant = match state.queue.offer(
            move |want| matches!((want, pkey.as_ref()), (Some(w), Some(k)) if w == k),
            grant,
        ) {
            Ok(()) => {
                self.available.notify_all();
                return None;
            }
            Err(grant) => grant,
        };
        let grant = match state.queue.offer(|want| want.is_none(), grant) {
            Ok(()) => {
                self.available.notify_all();
                return None;
            }
            Err(grant) => grant,
        };
        let SharedGrant::Ready { entry, key } = grant else {
            return None;
        };
        match state.queue.offer(|_| true, SharedGrant::Permit) {
            Ok(()) => {
                self.available.notify_all();
                Some(entry)
            }
            Err(_) => {
                state.idle.entry(key).or_default().push_back(entry);
                None
            }
        }
    }

    fn release_slot(&self, state: &mut SharedState<F>) {
        if !state.closed && state.queue.offer(|_| true, SharedGrant::Permit).is_ok() {
            self.available.notify_all();
        } else {
            state.live -= 1;
        }
    }

    pub(crate) fn forget(&self, id: u64) {
        if self.active.remove(&id).is_none() {
            return;
        }
        let mut state = self.state.lock();
        self.release_slot(&mut state);
    }

    pub(crate) fn destroy_quiet(&self, resource: F::Resource) {
        match self.factory.destroy(resource) {
            Ok(()) => {
                self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "resource destruction failed"),
        }
    }
}
