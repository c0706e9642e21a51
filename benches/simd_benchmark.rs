//! Dispatched distance kernel vs. its portable scalar reference.
//!
//! `dot_dispatched`/`l2_squared_dispatched` cache their resolved kernel in a
//! process-wide `OnceLock` (see `src/simd/mod.rs`); the override hint only
//! matters on the first call per process, so this binary can't switch paths
//! mid-run. To benchmark a specific path, set `VDB_SIMD=avx2` (or `avx512`,
//! `scalar`) in the environment before running this binary.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vecgraph::config::SimdOverride;
use vecgraph::distance::{dot_scalar, l2_squared_scalar};
use vecgraph::simd::{dot_dispatched, l2_squared_dispatched};

const DIMENSIONS: [usize; 4] = [16, 64, 256, 1024];

fn vector(dim: usize, seed: u32) -> Vec<f32> {
    (0..dim).map(|i| ((seed as usize + i) % 997) as f32 / 997.0).collect()
}

fn bench_dot(c: &mut Criterion) {
    let mut group = c.benchmark_group("dot_product");
    for dim in DIMENSIONS {
        let a = vector(dim, 1);
        let b = vector(dim, 2);
        group.bench_with_input(BenchmarkId::new("scalar", dim), &dim, |bencher, _| {
            bencher.iter(|| black_box(dot_scalar(&a, &b)));
        });
        group.bench_with_input(BenchmarkId::new("dispatched", dim), &dim, |bencher, _| {
            bencher.iter(|| black_box(dot_dispatched(&a, &b, SimdOverride::Auto)));
        });
    }
    group.finish();
}

fn bench_l2_squared(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_squared");
    for dim in DIMENSIONS {
        let a = vector(dim, 3);
        let b = vector(dim, 4);
        group.bench_with_input(BenchmarkId::new("scalar", dim), &dim, |bencher, _| {
            bencher.iter(|| black_box(l2_squared_scalar(&a, &b)));
        });
        group.bench_with_input(BenchmarkId::new("dispatched", dim), &dim, |bencher, _| {
            bencher.iter(|| black_box(l2_squared_dispatched(&a, &b, SimdOverride::Auto)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dot, bench_l2_squared);
criterion_main!(benches);
