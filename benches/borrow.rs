use criterion::{Criterion, criterion_group, criterion_main};
use tierpool::{BoxError, PoolConfig, ResourceFactory, TieredPool};

struct NullFactory;

struct NullConn;

impl ResourceFactory for NullFactory {
    type Resource = NullConn;
    type Key = u32;

    fn create(&self, _key: Option<&u32>) -> Result<NullConn, BoxError> {
        Ok(NullConn)
    }

    fn destroy(&self, _conn: NullConn) -> Result<(), BoxError> {
        Ok(())
    }
}

fn bench_borrow(c: &mut Criterion) {
    let pool = TieredPool::new(NullFactory, PoolConfig::default().with_capacity(8));

    c.bench_function("primary_borrow_return", |b| {
        b.iter(|| {
            let lease = pool.borrow_primary().unwrap();
            pool.give_back(lease).unwrap();
        })
    });

    c.bench_function("keyed_borrow_return", |b| {
        b.iter(|| {
            let lease = pool.borrow(&1).unwrap();
            pool.give_back(lease).unwrap();
        })
    });

    c.bench_function("unkeyed_borrow_return", |b| {
        b.iter(|| {
            let lease = pool.borrow_any().unwrap();
            pool.give_back(lease).unwrap();
        })
    });
}

criterion_group!(benches, bench_borrow);
criterion_main!(benches);
