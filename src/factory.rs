//! The capability interface a pool consumes to manage resource lifecycles

use std::fmt::Debug;
use std::hash::Hash;

use crate::errors::BoxError;

/// Creates, validates and disposes of the opaque resources held by a pool.
///
/// The pool never looks inside a [`Resource`](ResourceFactory::Resource); the
/// three methods below are the entire engine-facing surface. A keyed creation
/// request carries the borrower's key, an unkeyed one carries `None`.
pub trait ResourceFactory: Send + Sync + 'static {
    /// Opaque handle to an underlying connection.
    type Resource: Send + 'static;

    /// Key distinguishing resources in the shared tier.
    type Key: Debug + Eq + Hash + Clone + Send + Sync + 'static;

    /// Open a new resource, optionally bound to a key.
    fn create(&self, key: Option<&Self::Key>) -> Result<Self::Resource, BoxError>;

    /// Whether a resource coming back from a borrower is fit for reuse.
    fn validate(&self, resource: &Self::Resource) -> bool {
        let _ = resource;
        true
    }

    /// Dispose of a resource permanently.
    fn destroy(&self, resource: Self::Resource) -> Result<(), BoxError>;
}
