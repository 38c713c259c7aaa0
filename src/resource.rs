//! The borrowed-resource handle

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::factory::ResourceFactory;
use crate::shared::SharedInner;
use crate::single::SingleInner;

/// A resource on loan from a pool.
///
/// Dereferences to the underlying resource. The tier tag set at creation is
/// immutable and decides which pool the resource goes back to. Dropping a
/// lease returns it automatically; [`give_back`](crate::TieredPool::give_back)
/// is the checked path that reports misuse.
pub struct Lease<F: ResourceFactory> {
    value: Option<F::Resource>,
    id: u64,
    key: Option<F::Key>,
    primary: bool,
    owner: LeaseOwner<F>,
}

pub(crate) enum LeaseOwner<F: ResourceFactory> {
    Single(Weak<SingleInner<F>>),
    Shared(Weak<SharedInner<F>>),
}

impl<F: ResourceFactory> Lease<F> {
    pub(crate) fn primary(id: u64, value: F::Resource, owner: Weak<SingleInner<F>>) -> Self {
        Self {
            value: Some(value),
            id,
            key: None,
            primary: true,
            owner: LeaseOwner::Single(owner),
        }
    }

    pub(crate) fn secondary(
        id: u64,
        value: F::Resource,
        key: Option<F::Key>,
        owner: Weak<SharedInner<F>>,
    ) -> Self {
        Self {
            value: Some(value),
            id,
            key,
            primary: false,
            owner: LeaseOwner::Shared(owner),
        }
    }

    /// Whether this resource belongs to the exclusive tier.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// The key this resource was created under, if any.
    pub fn key(&self) -> Option<&F::Key> {
        self.key.as_ref()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn take_value(&mut self) -> Option<F::Resource> {
        self.value.take()
    }

    pub(crate) fn restore(&mut self, value: F::Resource) {
        self.value = Some(value);
    }

    pub(crate) fn owned_by_single(&self, inner: &Arc<SingleInner<F>>) -> bool {
        matches!(&self.owner, LeaseOwner::Single(w) if w.as_ptr() == Arc::as_ptr(inner))
    }

    pub(crate) fn owned_by_shared(&self, inner: &Arc<SharedInner<F>>) -> bool {
        matches!(&self.owner, LeaseOwner::Shared(w) if w.as_ptr() == Arc::as_ptr(inner))
    }

    /// Remove the resource from pool accounting permanently and take
    /// ownership of it. The freed capacity slot is handed to a waiter or
    /// released.
    pub fn detach(mut self) -> F::Resource {
        let value = self.value.take().expect("resource already released");
        match &self.owner {
            LeaseOwner::Single(w) => {
                if let Some(inner) = w.upgrade() {
                    inner.forget(self.id);
                }
            }
            LeaseOwner::Shared(w) => {
                if let Some(inner) = w.upgrade() {
                    inner.forget(self.id);
                }
            }
        }
        value
    }
}

impl<F: ResourceFactory> Deref for Lease<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("resource already released")
    }
}

impl<F: ResourceFactory> DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("resource already released")
    }
}

impl<F: ResourceFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        let outcome = match &self.owner {
            LeaseOwner::Single(w) => w.upgrade().map(|inner| inner.repay(self.id, value)),
            LeaseOwner::Shared(w) => w.upgrade().map(|inner| inner.repay(self.id, value)),
        };
        match outcome {
            Some(Err(e)) => warn!(id = self.id, error = %e, "dropped lease could not be returned"),
            None => debug!(id = self.id, "lease outlived its pool"),
            Some(Ok(())) => {}
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("primary", &self.primary)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::PoolConfig;
    use crate::single::SinglePool;
    use crate::test_support::TestFactory;

    #[test]
    fn dropping_a_lease_returns_it() {
        let factory = Arc::new(TestFactory::default());
        let pool = SinglePool::new(Arc::clone(&factory), PoolConfig::default());

        {
            let lease = pool.borrow().unwrap();
            assert!(lease.is_primary());
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(factory.destroyed.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn detach_removes_the_resource_from_accounting() {
        let factory = Arc::new(TestFactory::default());
        let pool = SinglePool::new(Arc::clone(&factory), PoolConfig::default());

        let lease = pool.borrow().unwrap();
        let conn = lease.detach();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.borrowed_count(), 0);

        // the pool recreates on the next borrow
        let next = pool.borrow().unwrap();
        assert_ne!(next.serial, conn.serial);
    }
}
