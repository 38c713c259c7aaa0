//! Pool configuration options

use std::time::Duration;

/// Configuration shared by both pool tiers.
///
/// # Examples
///
/// ```
/// use tierpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_capacity(8)
///     .with_borrow_timeout(Duration::from_secs(5))
///     .with_idle_grace(Duration::from_secs(60));
///
/// assert_eq!(config.capacity, 8);
/// assert_eq!(config.borrow_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Maximum number of live resources (borrowed + idle) in the shared tier.
    pub capacity: usize,

    /// Default deadline for blocking borrows; `None` waits indefinitely.
    pub borrow_timeout: Option<Duration>,

    /// Idle duration after which a low-priority eviction pass destroys a
    /// resource. High priority ignores this and evicts everything idle.
    pub idle_grace: Duration,

    /// How long `close` on the exclusive tier waits for a borrowed resource
    /// to come back before proceeding; `None` marks it for destruction on
    /// return instead of waiting.
    pub drain_timeout: Option<Duration>,

    /// Whether returned shared resources are checked with the factory's
    /// validation hook before re-entering the idle set.
    pub validate_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            borrow_timeout: Some(Duration::from_secs(30)),
            idle_grace: Duration::from_secs(30),
            drain_timeout: None,
            validate_on_return: true,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared-tier capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the default borrow deadline
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = Some(timeout);
        self
    }

    /// Make blocking borrows wait indefinitely by default
    pub fn without_borrow_timeout(mut self) -> Self {
        self.borrow_timeout = None;
        self
    }

    /// Set the idle grace period for low-priority eviction
    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Make `close` on the exclusive tier wait for the writer to come back
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Enable or disable factory validation of returned shared resources
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_on_return = validate;
        self
    }
}
