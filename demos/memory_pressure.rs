//! Reacting to memory pressure: priority-driven eviction of idle readers.
//!
//! Run with: cargo run --example memory_pressure

use std::time::Duration;

use tierpool::{BoxError, PoolConfig, Priority, ResourceFactory, TieredPool};

struct Connections;

struct Connection;

impl ResourceFactory for Connections {
    type Resource = Connection;
    type Key = u32;

    fn create(&self, _key: Option<&u32>) -> Result<Connection, BoxError> {
        Ok(Connection)
    }

    fn destroy(&self, _conn: Connection) -> Result<(), BoxError> {
        Ok(())
    }
}

fn main() {
    let config = PoolConfig::default()
        .with_capacity(4)
        .with_idle_grace(Duration::from_secs(60));
    let pool = TieredPool::new(Connections, config);

    // park four idle readers
    let leases: Vec<_> = (0..4).map(|k| pool.borrow(&k).unwrap()).collect();
    drop(leases);
    println!("idle readers: {}", pool.shared_pool().idle_count());

    // a moderate pressure signal spares recently used resources
    pool.clear(Priority::Low);
    println!("after low-priority clear: {}", pool.shared_pool().idle_count());

    // a critical signal evicts everything idle
    pool.clear(Priority::High);
    println!("after high-priority clear: {}", pool.shared_pool().idle_count());

    println!(
        "{}",
        pool.shared_pool().export_metrics_prometheus("readers", None)
    );

    pool.close().unwrap();
}
