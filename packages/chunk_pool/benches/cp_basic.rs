//! Basic benchmarks for the `chunk_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use chunk_pool::{FixedChunkPool, GrowableChunkPool};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = u64;
const CHUNK_SIZE: usize = 64;
const CHUNK_COUNT: usize = 128;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("cp_basic");

    let allocs_op = allocs.operation("fixed_build");
    group.bench_function("fixed_build", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(FixedChunkPool::<TestItem>::new(
                    CHUNK_SIZE,
                    CHUNK_COUNT,
                )));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fixed_allocate_first");
    group.bench_function("fixed_allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools =
                iter::repeat_with(|| FixedChunkPool::<TestItem>::new(CHUNK_SIZE, CHUNK_COUNT))
                    .take(usize::try_from(iters).unwrap())
                    .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fixed_allocate_deallocate");
    group.bench_function("fixed_allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let mut pool = FixedChunkPool::<TestItem>::new(CHUNK_SIZE, CHUNK_COUNT);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let chunk = pool.allocate().unwrap();

                // SAFETY: The chunk came from this pool and is returned exactly once.
                unsafe { pool.deallocate(black_box(chunk)) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fixed_fill_and_drain");
    group.bench_function("fixed_fill_and_drain", |b| {
        b.iter_custom(|iters| {
            let mut pool = FixedChunkPool::<TestItem>::new(CHUNK_SIZE, CHUNK_COUNT);
            let mut chunks = Vec::with_capacity(CHUNK_COUNT);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                while let Ok(chunk) = pool.allocate() {
                    chunks.push(chunk);
                }

                for chunk in chunks.drain(..) {
                    // SAFETY: The chunk came from this pool and is returned exactly once.
                    unsafe { pool.deallocate(chunk) };
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("growable_allocate_deallocate");
    group.bench_function("growable_allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let pool = GrowableChunkPool::<TestItem>::new(CHUNK_SIZE, CHUNK_COUNT);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let chunk = pool.allocate().unwrap();

                // SAFETY: The chunk came from this pool and is returned exactly once.
                unsafe { pool.deallocate(black_box(chunk)) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("growable_allocate_with_growth");
    group.bench_function("growable_allocate_with_growth", |b| {
        b.iter_custom(|iters| {
            let pool = GrowableChunkPool::<TestItem>::new(CHUNK_SIZE, CHUNK_COUNT);
            let mut chunks = Vec::with_capacity(usize::try_from(iters).unwrap());

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                chunks.push(black_box(pool.allocate().unwrap()));
            }

            let elapsed = start.elapsed();

            for chunk in chunks {
                // SAFETY: The chunk came from this pool and is returned exactly once.
                unsafe { pool.deallocate(chunk) };
            }

            elapsed
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
