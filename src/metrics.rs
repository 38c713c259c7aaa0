//! Metrics collection and export for the pool tiers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one tier's counters and gauges.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources created by the factory
    pub created: u64,

    /// Resources destroyed by the factory
    pub destroyed: u64,

    /// Successful borrows
    pub borrows: u64,

    /// Resources returned to the pool
    pub returns: u64,

    /// Borrows that exceeded their deadline
    pub timeouts: u64,

    /// Returned resources rejected by the factory's validation hook
    pub validation_failures: u64,

    /// Idle resources destroyed by eviction
    pub evictions: u64,

    /// Resources currently borrowed
    pub borrowed: usize,

    /// Resources currently idle
    pub idle: usize,

    /// Maximum live resources for this tier
    pub capacity: usize,

    /// borrowed / capacity, in [0.0, 1.0]
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a string map
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("borrows".to_string(), self.borrows.to_string());
        metrics.insert("returns".to_string(), self.returns.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert(
            "validation_failures".to_string(),
            self.validation_failures.to_string(),
        );
        metrics.insert("evictions".to_string(), self.evictions.to_string());
        metrics.insert("borrowed".to_string(), self.borrowed.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics snapshots for both tiers of a [`TieredPool`](crate::TieredPool).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TieredMetrics {
    pub primary: PoolMetrics,
    pub shared: PoolMetrics,
}

/// Exporter for the Prometheus text exposition format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export one tier's metrics in Prometheus exposition format
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges: [(&str, &str, String); 3] = [
            (
                "tierpool_resources_borrowed",
                "Resources currently borrowed",
                metrics.borrowed.to_string(),
            ),
            (
                "tierpool_resources_idle",
                "Resources currently idle",
                metrics.idle.to_string(),
            ),
            (
                "tierpool_utilization",
                "Borrowed share of tier capacity",
                format!("{:.2}", metrics.utilization),
            ),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name}{{{labels}}} {value}\n"));
        }

        let counters: [(&str, &str, u64); 7] = [
            (
                "tierpool_resources_created_total",
                "Resources created by the factory",
                metrics.created,
            ),
            (
                "tierpool_resources_destroyed_total",
                "Resources destroyed by the factory",
                metrics.destroyed,
            ),
            (
                "tierpool_borrows_total",
                "Successful borrows",
                metrics.borrows,
            ),
            (
                "tierpool_returns_total",
                "Resources returned",
                metrics.returns,
            ),
            (
                "tierpool_timeouts_total",
                "Borrows that exceeded their deadline",
                metrics.timeouts,
            ),
            (
                "tierpool_validation_failures_total",
                "Returned resources rejected by validation",
                metrics.validation_failures,
            ),
            (
                "tierpool_evictions_total",
                "Idle resources destroyed by eviction",
                metrics.evictions,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name}{{{labels}}} {value}\n"));
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal per-tier counter set
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub borrows: AtomicU64,
    pub returns: AtomicU64,
    pub timeouts: AtomicU64,
    pub validation_failures: AtomicU64,
    pub evictions: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            borrows: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self, borrowed: usize, idle: usize, capacity: usize) -> PoolMetrics {
        let utilization = if capacity > 0 {
            borrowed as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            borrows: self.borrows.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            borrowed,
            idle,
            capacity,
            utilization,
        }
    }
}
