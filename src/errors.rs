//! Error types for the tiered pool

use std::time::Duration;

use thiserror::Error;

/// Boxed error type used at the factory seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("borrow timed out after {0:?}")]
    Timeout(Duration),

    #[error("resource does not belong to this pool")]
    ForeignResource,

    #[error("resource was already returned or detached")]
    AlreadyReleased,

    #[error("resource factory error: {0}")]
    Factory(BoxError),

    #[error("failed to destroy {} resource(s) during close", .0.len())]
    Teardown(Vec<BoxError>),
}

pub type PoolResult<T> = Result<T, PoolError>;
