//! The exclusive single-resource tier
//!
//! Manages the one serialized writer connection: lazily created, borrowed by
//! at most one caller at a time, with blocked borrowers served in FIFO order
//! through direct handoff.

use std::collections::HashMap;
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

/// Pool holding exactly one exclusive resource.
pub struct SinglePool<F: ResourceFactory> {
    inner: Arc<SingleInner<F>>,
}

pub(crate) struct SingleInner<F: ResourceFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    state: Mutex<SingleState<F::Resource>>,
    available: Condvar,
    active: DashMap<u64, ()>,
    metrics: MetricsTracker,
    ids: AtomicU64,
}

struct SingleState<T> {
    idle: Option<IdleSlot<T>>,
    // true whenever the resource exists: idle, borrowed, or parked in a grant
    live: bool,
    borrowed: Option<u64>,
    closed: bool,
    queue: WaitQueue<(), SingleGrant<T>>,
}

struct IdleSlot<T> {
    id: u64,
    resource: T,
    since: Instant,
}

enum SingleGrant<T> {
    Ready(IdleSlot<T>),
    Recreate,
}

impl<F: ResourceFactory> SinglePool<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(SingleInner {
                factory,
                config,
                state: Mutex::new(SingleState {
                    idle: None,
                    live: false,
                    borrowed: None,
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

    /// Borrow the sole resource, waiting up to the configured timeout.
    ///
    /// The resource is created lazily on first demand. Fails with
    /// [`PoolError::Closed`] after [`close`](Self::close) and with
    /// [`PoolError::Timeout`] when the wait exceeds the deadline.
    pub fn borrow(&self) -> PoolResult<Lease<F>> {
        self.borrow_deadline(self.inner.config.borrow_timeout)
    }

    /// Borrow with an explicit deadline.
    pub fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Lease<F>> {
        self.borrow_deadline(Some(timeout))
    }

    /// Borrow without waiting. `Ok(None)` means the resource is on loan.
    pub fn try_borrow(&self) -> PoolResult<Option<Lease<F>>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(slot) = state.idle.take() {
            return Ok(Some(self.admit(&mut state, slot)));
        }
        if !state.live {
            return self.create_holding(state).map(Some);
        }
        Ok(None)
    }

    fn borrow_deadline(&self, timeout: Option<Duration>) -> PoolResult<Lease<F>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(slot) = state.idle.take() {
            return Ok(self.admit(&mut state, slot));
        }
        if !state.live {
            return self.create_holding(state);
        }
        let ticket = state.queue.enqueue(None);
        loop {
            if let Some(grant) = state.queue.take_grant(ticket) {
                return self.serve_grant(state, grant);
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
                    Some(grant) => self.serve_grant(state, grant),
                    None => {
                        inner.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                        Err(PoolError::Timeout(timeout.unwrap_or_default()))
                    }
                };
            }
        }
    }

    fn serve_grant(
        &self,
        mut state: MutexGuard<'_, SingleState<F::Resource>>,
        grant: SingleGrant<F::Resource>,
    ) -> PoolResult<Lease<F>> {
        match grant {
            SingleGrant::Ready(slot) => Ok(self.admit(&mut state, slot)),
            SingleGrant::Recreate => {
                if state.closed {
                    return Err(PoolError::Closed);
                }
                self.create_holding(state)
            }
        }
    }

    fn admit(&self, state: &mut SingleState<F::Resource>, slot: IdleSlot<F::Resource>) -> Lease<F> {
        state.borrowed = Some(slot.id);
        self.inner.active.insert(slot.id, ());
        self.inner.metrics.borrows.fetch_add(1, Ordering::Relaxed);
        Lease::primary(slot.id, slot.resource, Arc::downgrade(&self.inner))
    }

    fn create_holding(
        &self,
        mut state: MutexGuard<'_, SingleState<F::Resource>>,
    ) -> PoolResult<Lease<F>> {
        let inner = &self.inner;
        let id = inner.ids.fetch_add(1, Ordering::Relaxed);
        state.live = true;
        state.borrowed = Some(id);
        drop(state);
        match inner.factory.create(None) {
            Ok(resource) => {
                inner.active.insert(id, ());
                inner.metrics.created.fetch_add(1, Ordering::Relaxed);
                inner.metrics.borrows.fetch_add(1, Ordering::Relaxed);
                debug!(id, "created primary resource");
                Ok(Lease::primary(id, resource, Arc::downgrade(&self.inner)))
            }
            Err(e) => {
                let mut state = inner.state.lock();
                state.live = false;
                state.borrowed = None;
                if !state.closed && state.queue.offer(|_| true, SingleGrant::Recreate).is_ok() {
                    inner.available.notify_all();
                }
                drop(state);
                warn!(error = %e, "primary resource creation failed");
                Err(PoolError::Factory(e))
            }
        }
    }

    /// Return a borrowed resource, waking the longest-blocked borrower.
    pub fn give_back(&self, mut lease: Lease<F>) -> PoolResult<()> {
        let Some(value) = lease.take_value() else {
            return Err(PoolError::AlreadyReleased);
        };
        if !lease.owned_by_single(&self.inner) {
            lease.restore(value);
            return Err(PoolError::ForeignResource);
        }
        self.inner.repay(lease.id(), value)
    }

    /// Destroy the resource if it is idle and past the priority threshold.
    /// A borrowed resource is never touched; the next borrow recreates.
    pub fn clear(&self, priority: Priority) {
        let victim = {
            let mut state = self.inner.state.lock();
            let evictable = state.idle.as_ref().is_some_and(|slot| {
                should_evict(priority, slot.since.elapsed(), self.inner.config.idle_grace)
            });
            if evictable {
                state.live = false;
                state.idle.take()
            } else {
                None
            }
        };
        if let Some(slot) = victim {
            debug!(id = slot.id, "evicted primary resource");
            self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            self.inner.destroy_quiet(slot.resource);
        }
    }

    /// Close the pool. Waits up to `PoolConfig::drain_timeout` for a borrowed
    /// resource to come back, destroys whatever is idle, and rejects every
    /// later operation. Closing twice is a no-op.
    pub fn close(&self) -> PoolResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        debug!(waiters = state.queue.len(), "closing exclusive tier");
        let granted = state.queue.drain();
        inner.available.notify_all();
        if let Some(timeout) = inner.config.drain_timeout {
            let deadline = Instant::now() + timeout;
            while state.borrowed.is_some() {
                if inner.available.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        let idle = state.idle.take();
        state.live = state.borrowed.is_some();
        drop(state);

        let mut failures = Vec::new();
        for grant in granted {
            if let SingleGrant::Ready(slot) = grant {
                match inner.factory.destroy(slot.resource) {
                    Ok(()) => {
                        inner.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => failures.push(e),
                }
            }
        }
        if let Some(slot) = idle {
            match inner.factory.destroy(slot.resource) {
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
        if self.inner.state.lock().idle.is_some() { 1 } else { 0 }
    }

    pub fn borrowed_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.idle_count();
        self.inner.metrics.snapshot(self.inner.active.len(), idle, 1)
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

impl<F: ResourceFactory> Clone for SinglePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> SingleInner<F> {
    pub(crate) fn repay(&self, id: u64, resource: F::Resource) -> PoolResult<()> {
        if self.active.remove(&id).is_none() {
            return Err(PoolError::AlreadyReleased);
        }
        self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.borrowed = None;
        if state.closed {
            state.live = false;
            self.available.notify_all();
            drop(state);
            self.destroy_quiet(resource);
            return Ok(());
        }
        let slot = IdleSlot {
            id,
            resource,
            since: Instant::now(),
        };
        match state.queue.offer(|_| true, SingleGrant::Ready(slot)) {
            Ok(()) => {
                self.available.notify_all();
            }
            Err(SingleGrant::Ready(slot)) => state.idle = Some(slot),
            Err(SingleGrant::Recreate) => {}
        }
        Ok(())
    }

    pub(crate) fn forget(&self, id: u64) {
        if self.active.remove(&id).is_none() {
            return;
        }
        let mut state = self.state.lock();
        if state.borrowed == Some(id) {
            state.borrowed = None;
        }
        state.live = false;
        if state.closed {
            self.available.notify_all();
        } else if state.queue.offer(|_| true, SingleGrant::Recreate).is_ok() {
            self.available.notify_all();
        }
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::test_support::TestFactory;

    fn pool_with(config: PoolConfig) -> (Arc<TestFactory>, SinglePool<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let pool = SinglePool::new(Arc::clone(&factory), config);
        (factory, pool)
    }

    #[test]
    fn creates_lazily_and_reuses() {
        let (factory, pool) = pool_with(PoolConfig::default());
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        let lease = pool.borrow().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        drop(lease);

        let _again = pool.borrow().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn at_most_one_borrower_across_threads() {
        let (_factory, pool) = pool_with(PoolConfig::default());
        let in_use = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let in_use = Arc::clone(&in_use);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let lease = pool.borrow().unwrap();
                        let concurrent = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        assert_eq!(concurrent, 1, "two borrowers held the writer at once");
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        drop(lease);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn waiters_are_served_fifo() {
        let (_factory, pool) = pool_with(PoolConfig::default());
        let held = pool.borrow().unwrap();
        let (tx, rx) = mpsc::channel();

        let mut handles = Vec::new();
        for tag in [1, 2] {
            let pool = pool.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let lease = pool.borrow().unwrap();
                tx.send(tag).unwrap();
                thread::sleep(Duration::from_millis(20));
                drop(lease);
            }));
            // let this waiter enqueue before spawning the next
            thread::sleep(Duration::from_millis(100));
        }

        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn bounded_borrow_times_out() {
        let (_factory, pool) = pool_with(PoolConfig::default());
        let _held = pool.borrow().unwrap();

        let start = Instant::now();
        let err = pool.borrow_timeout(Duration::from_millis(50)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, PoolError::Timeout(_)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(pool.metrics().timeouts, 1);
    }

    #[test]
    fn try_borrow_does_not_wait() {
        let (_factory, pool) = pool_with(PoolConfig::default());
        let held = pool.try_borrow().unwrap();
        assert!(held.is_some());
        assert!(pool.try_borrow().unwrap().is_none());
    }

    #[test]
    fn close_rejects_new_borrows_and_destroys_late_returns() {
        let (factory, pool) = pool_with(PoolConfig::default());
        let lease = pool.borrow().unwrap();

        pool.close().unwrap();
        assert!(matches!(pool.borrow(), Err(PoolError::Closed)));
        assert!(matches!(pool.try_borrow(), Err(PoolError::Closed)));

        drop(lease);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        pool.close().unwrap();
    }

    #[test]
    fn close_can_wait_for_the_borrower() {
        let (factory, pool) =
            pool_with(PoolConfig::default().with_drain_timeout(Duration::from_secs(5)));
        let lease = pool.borrow().unwrap();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(lease);
        });

        let start = Instant::now();
        pool.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_high_destroys_the_idle_resource() {
        let (factory, pool) = pool_with(PoolConfig::default());
        let first = pool.borrow().unwrap();
        let first_serial = first.serial;
        drop(first);

        pool.clear(Priority::High);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);

        let recreated = pool.borrow().unwrap();
        assert_ne!(recreated.serial, first_serial);
    }

    #[test]
    fn clear_low_respects_the_grace_period() {
        let (factory, pool) =
            pool_with(PoolConfig::default().with_idle_grace(Duration::from_secs(600)));
        drop(pool.borrow().unwrap());

        pool.clear(Priority::Low);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn clear_never_touches_a_borrowed_resource() {
        let (factory, pool) = pool_with(PoolConfig::default());
        let lease = pool.borrow().unwrap();

        pool.clear(Priority::High);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);

        drop(lease);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn failed_create_releases_the_slot() {
        let (factory, pool) = pool_with(PoolConfig::default());
        factory.fail_creates.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow(), Err(PoolError::Factory(_))));

        factory.fail_creates.store(false, Ordering::SeqCst);
        let lease = pool.borrow().unwrap();
        assert!(lease.is_primary());
    }

    #[test]
    fn foreign_resources_are_rejected_and_survive() {
        let (_fa, pool_a) = pool_with(PoolConfig::default());
        let (_fb, pool_b) = pool_with(PoolConfig::default());

        let lease = pool_a.borrow().unwrap();
        let err = pool_b.give_back(lease).unwrap_err();
        assert!(matches!(err, PoolError::ForeignResource));
        // give_back consumed the lease; its drop returned it home
        assert_eq!(pool_a.idle_count(), 1);
        assert_eq!(pool_b.idle_count(), 0);
    }
}
