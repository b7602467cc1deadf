//! Criterion micro-benchmarks for arena allocation, scopes and the heap
//! baseline.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use kiln_arena::Arena;
use kiln_bench::alloc_sizes;
use kiln_core::{Allocator, HeapAllocator};

const RESERVE: usize = 64 << 20;

/// Benchmark: 1K mixed-size allocations inside a scope, then rewind.
fn bench_scoped_mixed_1k(c: &mut Criterion) {
    let sizes = alloc_sizes(1_000, 4096, 42);
    let mut arena = Arena::new(RESERVE, 1 << 20).unwrap();
    c.bench_function("arena_scoped_mixed_1k", |b| {
        b.iter(|| {
            let scope = arena.scope();
            for &size in &sizes {
                black_box(scope.malloc(size).unwrap());
            }
        });
    });
}

/// Benchmark: the same 1K sizes through the C heap, freed afterwards.
fn bench_heap_mixed_1k(c: &mut Criterion) {
    let sizes = alloc_sizes(1_000, 4096, 42);
    let heap = HeapAllocator::instance();
    let mut live = Vec::with_capacity(sizes.len());
    c.bench_function("heap_mixed_1k", |b| {
        b.iter(|| {
            for &size in &sizes {
                live.push(heap.malloc(size).unwrap());
            }
            for ptr in live.drain(..) {
                // SAFETY: every pointer came from `heap.malloc` above.
                unsafe { heap.free(black_box(ptr)) };
            }
        });
    });
}

/// Benchmark: typed allocation of 10K small values (no destructor).
fn bench_typed_10k(c: &mut Criterion) {
    let mut arena = Arena::new(RESERVE, 1 << 20).unwrap();
    c.bench_function("arena_typed_10k", |b| {
        b.iter(|| {
            let scope = arena.scope();
            for i in 0..10_000u64 {
                black_box(scope.alloc([i; 4]).unwrap());
            }
        });
    });
}

/// Benchmark: fresh arena, first-touch growth to 8 MiB committed.
fn bench_commit_growth(c: &mut Criterion) {
    c.bench_function("arena_commit_growth_8m", |b| {
        b.iter_batched(
            || Arena::new(RESERVE, 4096).unwrap(),
            |arena| {
                for _ in 0..128 {
                    black_box(arena.malloc(64 << 10).unwrap());
                }
                arena
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_scoped_mixed_1k,
    bench_heap_mixed_1k,
    bench_typed_10k,
    bench_commit_growth
);
criterion_main!(benches);
