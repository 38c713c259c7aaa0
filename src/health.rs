//! Health monitoring derived from metrics snapshots

use crate::metrics::PoolMetrics;

/// Health evaluation of one pool tier.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the tier looks healthy
    pub is_healthy: bool,

    /// Borrowed share of capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Evaluate a metrics snapshot
    pub fn evaluate(metrics: &PoolMetrics) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if metrics.utilization > 0.9 {
            warnings.push(format!(
                "high utilization: {:.1}%",
                metrics.utilization * 100.0
            ));
            is_healthy = false;
        }

        if metrics.idle == 0 && metrics.borrowed == metrics.capacity && metrics.capacity > 0 {
            warnings.push("tier is saturated; borrows will block".to_string());
        }

        if metrics.timeouts > 0 && metrics.timeouts * 10 > metrics.borrows.max(1) {
            warnings.push(format!(
                "{} of {} borrows timed out",
                metrics.timeouts, metrics.borrows
            ));
            is_healthy = false;
        }

        Self {
            is_healthy,
            utilization: metrics.utilization,
            warnings,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

/// Health of both tiers of a [`TieredPool`](crate::TieredPool).
#[derive(Debug, Clone)]
pub struct TieredHealth {
    pub primary: HealthStatus,
    pub shared: HealthStatus,
}

impl TieredHealth {
    /// Healthy only when both tiers are
    pub fn is_healthy(&self) -> bool {
        self.primary.is_healthy && self.shared.is_healthy
    }
}
