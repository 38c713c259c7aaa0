//! # tierpool
//!
//! Tiered resource pooling for single-writer, multi-reader embedded
//! databases. An exclusive single-resource tier serializes access to the
//! writer connection, a bounded keyed tier shares reader connections, and a
//! facade routes between them by each resource's own tier tag.
//!
//! ## Features
//!
//! - Blocking borrows with per-call deadlines, FIFO waiter ordering and
//!   direct handoff from returner to waiter
//! - Keyed and any-available acquisition with LIFO reuse for cache warmth
//! - Priority-driven eviction of idle resources for memory-pressure handling
//! - Automatic return of leases via RAII, with a checked explicit path
//! - Factory validation of returned resources
//! - Async borrow variants and a periodic idle sweeper (tokio)
//! - Metrics with Prometheus text export, and health snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use tierpool::{BoxError, PoolConfig, ResourceFactory, TieredPool};
//!
//! struct Connections;
//! struct Connection;
//!
//! impl ResourceFactory for Connections {
//!     type Resource = Connection;
//!     type Key = String;
//!
//!     fn create(&self, _key: Option<&String>) -> Result<Connection, BoxError> {
//!         Ok(Connection)
//!     }
//!
//!     fn destroy(&self, _conn: Connection) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let pool = TieredPool::new(Connections, PoolConfig::default());
//!
//! let writer = pool.borrow_primary().unwrap();
//! pool.give_back(writer).unwrap();
//!
//! let reader = pool.borrow(&"main".to_string()).unwrap();
//! drop(reader); // leases return themselves
//!
//! pool.close().unwrap();
//! ```

mod config;
mod errors;
mod eviction;
mod factory;
mod health;
mod metrics;
mod resource;
mod shared;
mod single;
mod tiered;
mod wait;

pub use config::PoolConfig;
pub use errors::{BoxError, PoolError, PoolResult};
pub use eviction::Priority;
pub use factory::ResourceFactory;
pub use health::{HealthStatus, TieredHealth};
pub use metrics::{MetricsExporter, PoolMetrics, TieredMetrics};
pub use resource::Lease;
pub use shared::SharedPool;
pub use single::SinglePool;
pub use tiered::TieredPool;
