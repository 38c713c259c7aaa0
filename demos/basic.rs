//! Basic usage: one writer, keyed readers, automatic returns.
//!
//! Run with: cargo run --example basic

use tierpool::{BoxError, PoolConfig, ResourceFactory, TieredPool};

struct Connections;

struct Connection {
    label: String,
}

impl ResourceFactory for Connections {
    type Resource = Connection;
    type Key = String;

    fn create(&self, key: Option<&String>) -> Result<Connection, BoxError> {
        let label = match key {
            Some(k) => format!("reader:{k}"),
            None => "writer".to_string(),
        };
        println!("  opening {label}");
        Ok(Connection { label })
    }

    fn destroy(&self, conn: Connection) -> Result<(), BoxError> {
        println!("  closing {}", conn.label);
        Ok(())
    }
}

fn main() {
    let pool = TieredPool::new(Connections, PoolConfig::default().with_capacity(2));

    println!("borrowing the writer:");
    let writer = pool.borrow_primary().unwrap();
    println!("  got {}", writer.label);
    pool.give_back(writer).unwrap();

    println!("borrowing two readers:");
    let main_db = pool.borrow(&"main".to_string()).unwrap();
    let attached = pool.borrow(&"attached".to_string()).unwrap();
    println!("  got {} and {}", main_db.label, attached.label);

    // dropping a lease returns it to the pool
    drop(main_db);
    drop(attached);

    println!("reusing an idle reader:");
    let again = pool.borrow(&"main".to_string()).unwrap();
    println!("  got {}", again.label);
    drop(again);

    let metrics = pool.metrics();
    println!(
        "created {} resources for {} borrows",
        metrics.primary.created + metrics.shared.created,
        metrics.primary.borrows + metrics.shared.borrows,
    );

    pool.close().unwrap();
}
