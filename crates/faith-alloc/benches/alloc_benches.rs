//! Criterion benchmarks for cost allocation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use faith_alloc::CostAllocator;
use faith_alloc::curve::{saturation, scaled_ratio};
use faith_core::constants::DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY as TARGET;

fn bench_saturation(c: &mut Criterion) {
    let mut group = c.benchmark_group("saturation");
    for total in [0u64, TARGET / 3, TARGET, TARGET * 10] {
        group.bench_with_input(BenchmarkId::from_parameter(total), &total, |b, &t| {
            b.iter(|| saturation(scaled_ratio(black_box(t), TARGET)))
        });
    }
    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let allocator = CostAllocator::default();
    c.bench_function("allocate", |b| {
        b.iter(|| allocator.allocate(black_box(1_000_000), black_box(TARGET / 2)))
    });
}

criterion_group!(benches, bench_saturation, bench_allocate);
criterion_main!(benches);
