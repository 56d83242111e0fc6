//! Basic benchmarks for the `warehouse` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::sync::Arc;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use warehouse::{MemoryBudget, ObjectPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 4];

const BAY_CAPACITY: usize = 128;

fn new_pool() -> ObjectPool<TestItem> {
    ObjectPool::new(BAY_CAPACITY, Arc::new(MemoryBudget::unlimited()), || {
        [0; 4]
    })
    .expect("an unlimited budget never refuses a bay")
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("warehouse_basic");

    let allocs_op = allocs.operation("build_pool");
    group.bench_function("build_pool", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool()));
            }

            start.elapsed()
        });
    });

    // The point of the design: allocating from a warmed-up pool is allocation-free.
    let allocs_op = allocs.operation("allocate_release_warm");
    group.bench_function("allocate_release_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            // Warm up: one full take/release cycle so no growth happens while measuring.
            let warmup = pool.allocate().expect("first bay has free slots");
            pool.release(warmup).expect("handle was just allocated");

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let handle = black_box(pool.allocate().expect("pool never runs dry here"));
                pool.release(handle).expect("handle was just allocated");
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("get_one");
    group.bench_function("get_one", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();
            let handle = pool.allocate().expect("first bay has free slots");

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.get(handle).expect("handle stays alive"));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("warehouse_slow");

    let allocs_op = allocs.operation("allocate_10k_chaining");
    group.bench_function("allocate_10k_chaining", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..10_000 {
                    _ = black_box(pool.allocate().expect("budget is unlimited"));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("idle_maintain_half_dead_10k");
    group.bench_function("idle_maintain_half_dead_10k", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let handles = iter::repeat_with(|| pool.allocate().expect("budget is unlimited"))
                .take(10_000)
                .collect::<Vec<_>>();

            for handle in handles.iter().step_by(2) {
                pool.release(*handle).expect("handle was allocated above");
            }

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                pool.idle_maintain();
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
