//! The two-tier facade
//!
//! Routes acquisition to the exclusive tier (the serialized writer) or the
//! keyed shared tier (reader connections). Returns are routed by the lease's
//! own tier tag, never by caller intent, so misuse cannot corrupt the wrong
//! tier. The facade adds no locking of its own.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::Priority;
use crate::factory::ResourceFactory;
use crate::health::TieredHealth;
use crate::metrics::TieredMetrics;
use crate::resource::Lease;
use crate::shared::SharedPool;
use crate::single::SinglePool;

/// Facade over the exclusive and shared tiers.
///
/// See the crate docs for a usage example.
pub struct TieredPool<F: ResourceFactory> {
    single: SinglePool<F>,
    shared: SharedPool<F>,
    config: PoolConfig,
}

impl<F: ResourceFactory> TieredPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self::with_arc(Arc::new(factory), config)
    }

    pub fn with_arc(factory: Arc<F>, config: PoolConfig) -> Self {
        Self {
            single: SinglePool::new(Arc::clone(&factory), config.clone()),
            shared: SharedPool::new(factory, config.clone()),
            config,
        }
    }

    /// Borrow the exclusive resource. Never touches the shared tier.
    pub fn borrow_primary(&self) -> PoolResult<Lease<F>> {
        self.single.borrow()
    }

    pub fn borrow_primary_timeout(&self, timeout: Duration) -> PoolResult<Lease<F>> {
        self.single.borrow_timeout(timeout)
    }

    pub fn try_borrow_primary(&self) -> PoolResult<Option<Lease<F>>> {
        self.single.try_borrow()
    }

    /// Borrow a shared resource for `key`.
    pub fn borrow(&self, key: &F::Key) -> PoolResult<Lease<F>> {
        self.shared.borrow(key)
    }

    pub fn borrow_timeout(&self, key: &F::Key, timeout: Duration) -> PoolResult<Lease<F>> {
        self.shared.borrow_timeout(key, timeout)
    }

    pub fn try_borrow(&self, key: &F::Key) -> PoolResult<Option<Lease<F>>> {
        self.shared.try_borrow(key)
    }

    /// Borrow any available shared resource regardless of key.
    pub fn borrow_any(&self) -> PoolResult<Lease<F>> {
        self.shared.borrow_any()
    }

    pub fn borrow_any_timeout(&self, timeout: Duration) -> PoolResult<Lease<F>> {
        self.shared.borrow_any_timeout(timeout)
    }

    pub fn try_borrow_any(&self) -> PoolResult<Option<Lease<F>>> {
        self.shared.try_borrow_any()
    }

    /// Return a lease to its owning tier, decided by the lease's own tag.
    pub fn give_back(&self, lease: Lease<F>) -> PoolResult<()> {
        if lease.is_primary() {
            self.single.give_back(lease)
        } else {
            self.shared.give_back(lease)
        }
    }

    /// Evict idle resources in both tiers at the given priority. The tiers
    /// are cleared independently; neither waits for the other.
    pub fn clear(&self, priority: Priority) {
        self.single.clear(priority);
        self.shared.clear(priority);
    }

    /// Close both tiers. Both closes run to completion; destruction failures
    /// from either tier are aggregated into one [`PoolError::Teardown`].
    pub fn close(&self) -> PoolResult<()> {
        let mut failures = Vec::new();
        for result in [self.single.close(), self.shared.close()] {
            match result {
                Ok(()) => {}
                Err(PoolError::Teardown(errors)) => failures.extend(errors),
                Err(other) => return Err(other),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Teardown(failures))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.single.is_closed() && self.shared.is_closed()
    }

    /// Async counterpart of [`borrow_primary`](Self::borrow_primary).
    pub async fn borrow_primary_async(&self) -> PoolResult<Lease<F>> {
        self.poll_async(|| self.try_borrow_primary()).await
    }

    /// Async counterpart of [`borrow`](Self::borrow).
    pub async fn borrow_async(&self, key: &F::Key) -> PoolResult<Lease<F>> {
        self.poll_async(|| self.try_borrow(key)).await
    }

    /// Async counterpart of [`borrow_any`](Self::borrow_any).
    pub async fn borrow_any_async(&self) -> PoolResult<Lease<F>> {
        self.poll_async(|| self.try_borrow_any()).await
    }

    async fn poll_async<A>(&self, mut attempt: A) -> PoolResult<Lease<F>>
    where
        A: FnMut() -> PoolResult<Option<Lease<F>>>,
    {
        let timeout = self
            .config
            .borrow_timeout
            .unwrap_or(Duration::from_secs(30));

        tokio::time::timeout(timeout, async {
            loop {
                match attempt() {
                    Ok(Some(lease)) => return Ok(lease),
                    Ok(None) => tokio::time::sleep(Duration::from_millis(10)).await,
                    Err(e) => return Err(e),
                }
            }
        })
        .await
        .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Periodically run a low-priority eviction pass until the pool closes.
    pub fn spawn_idle_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.is_closed() {
                    break;
                }
                pool.clear(Priority::Low);
            }
        })
    }

    pub fn primary_pool(&self) -> &SinglePool<F> {
        &self.single
    }

    pub fn shared_pool(&self) -> &SharedPool<F> {
        &self.shared
    }

    pub fn metrics(&self) -> TieredMetrics {
        TieredMetrics {
            primary: self.single.metrics(),
            shared: self.shared.metrics(),
        }
    }

    pub fn health(&self) -> TieredHealth {
        TieredHealth {
            primary: self.single.health(),
            shared: self.shared.health(),
        }
    }
}

impl<F: ResourceFactory> Clone for TieredPool<F> {
    fn clone(&self) -> Self {
        Self {
            single: self.single.clone(),
            shared: self.shared.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::test_support::TestFactory;

    fn pool_with(config: PoolConfig) -> (Arc<TestFactory>, TieredPool<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let pool = TieredPool::with_arc(Arc::clone(&factory), config);
        (factory, pool)
    }

    #[test]
    fn primary_returns_reach_only_the_exclusive_tier() {
        let (_factory, pool) = pool_with(PoolConfig::default());

        let writer = pool.borrow_primary().unwrap();
        assert!(writer.is_primary());
        pool.give_back(writer).unwrap();

        assert_eq!(pool.primary_pool().idle_count(), 1);
        assert_eq!(pool.shared_pool().idle_count(), 0);
    }

    #[test]
    fn shared_returns_reach_only_the_shared_tier() {
        let (_factory, pool) = pool_with(PoolConfig::default());

        let reader = pool.borrow(&"db".to_string()).unwrap();
        assert!(!reader.is_primary());
        pool.give_back(reader).unwrap();

        assert_eq!(pool.primary_pool().idle_count(), 0);
        assert_eq!(pool.shared_pool().idle_count(), 1);
    }

    #[test]
    fn tiers_are_independent() {
        let (factory, pool) = pool_with(PoolConfig::default().with_capacity(2));

        let writer = pool.borrow_primary().unwrap();
        let reader_a = pool.borrow(&"a".to_string()).unwrap();
        let reader_b = pool.borrow_any().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);

        drop(writer);
        drop(reader_a);
        drop(reader_b);
        assert_eq!(pool.primary_pool().idle_count(), 1);
        assert_eq!(pool.shared_pool().idle_count(), 2);
    }

    #[test]
    fn clear_fans_out_to_both_tiers() {
        let (factory, pool) = pool_with(PoolConfig::default().with_capacity(2));
        drop(pool.borrow_primary().unwrap());
        drop(pool.borrow(&"a".to_string()).unwrap());

        pool.clear(Priority::High);

        assert_eq!(pool.primary_pool().idle_count(), 0);
        assert_eq!(pool.shared_pool().idle_count(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_closes_both_tiers() {
        let (_factory, pool) = pool_with(PoolConfig::default());
        drop(pool.borrow_primary().unwrap());
        drop(pool.borrow(&"a".to_string()).unwrap());

        pool.close().unwrap();

        assert!(pool.is_closed());
        assert!(matches!(pool.borrow_primary(), Err(PoolError::Closed)));
        assert!(matches!(
            pool.borrow(&"a".to_string()),
            Err(PoolError::Closed)
        ));
    }

    #[test]
    fn a_lease_from_another_pool_is_rejected_and_finds_its_way_home() {
        let (_fa, pool_a) = pool_with(PoolConfig::default());
        let (_fb, pool_b) = pool_with(PoolConfig::default());

        let writer = pool_a.borrow_primary().unwrap();
        let err = pool_b.give_back(writer).unwrap_err();
        assert!(matches!(err, PoolError::ForeignResource));

        assert_eq!(pool_a.primary_pool().idle_count(), 1);
        assert_eq!(pool_b.primary_pool().idle_count(), 0);
    }

    #[tokio::test]
    async fn async_borrows_work() {
        let (_factory, pool) = pool_with(PoolConfig::default());

        let writer = pool.borrow_primary_async().await.unwrap();
        assert!(writer.is_primary());
        drop(writer);

        let reader = pool.borrow_async(&"a".to_string()).await.unwrap();
        assert_eq!(reader.key(), Some(&"a".to_string()));
        drop(reader);

        let any = pool.borrow_any_async().await.unwrap();
        assert!(!any.is_primary());
    }

    #[tokio::test]
    async fn async_borrow_times_out() {
        let (_factory, pool) =
            pool_with(PoolConfig::default().with_borrow_timeout(Duration::from_millis(100)));

        let _held = pool.borrow_primary().unwrap();
        let err = pool.borrow_primary_async().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
    }

    #[tokio::test]
    async fn idle_sweeper_evicts_stale_resources() {
        let (_factory, pool) =
            pool_with(PoolConfig::default().with_idle_grace(Duration::ZERO));
        let sweeper = pool.spawn_idle_sweeper(Duration::from_millis(20));

        drop(pool.borrow(&"a".to_string()).unwrap());
        assert_eq!(pool.shared_pool().idle_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.shared_pool().idle_count(), 0);

        pool.close().unwrap();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop after close")
            .unwrap();
    }
}
