//! Eviction priority model for memory-pressure handling

use std::time::Duration;

/// Aggressiveness of an eviction pass over idle resources.
///
/// Raised by the host environment in response to platform memory-pressure
/// signals and passed to `clear`. Higher priority evicts more.
///
/// # Examples
///
/// ```
/// use tierpool::Priority;
///
/// assert!(Priority::Low < Priority::High);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// Evict only resources idle for at least the configured grace period.
    Low,

    /// Evict every idle resource immediately.
    High,
}

/// Whether a resource idle for `idle_for` should be destroyed at `priority`.
pub(crate) fn should_evict(priority: Priority, idle_for: Duration, grace: Duration) -> bool {
    match priority {
        Priority::High => true,
        Priority::Low => idle_for >= grace,
    }
}
