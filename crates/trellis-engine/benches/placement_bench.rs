//! Benchmarks for Trellis placement
//!
//! Measures performance of:
//! - Placement through the root with and without the position cache
//! - Placement under randomly chosen sponsors
//! - Downline stats, cold and cached

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use trellis_cache::{CachePolicy, PositionCache};
use trellis_engine::{EngineConfig, PlacementEngine};
use trellis_tree::{MemoryTreeStore, Node};

fn engine(cache: PositionCache) -> PlacementEngine<MemoryTreeStore> {
    PlacementEngine::new(
        Arc::new(MemoryTreeStore::new()),
        Arc::new(cache),
        EngineConfig::default(),
    )
}

/// Engine with `size` members placed under the root.
fn grown(size: usize, cache: PositionCache) -> (PlacementEngine<MemoryTreeStore>, Node) {
    let engine = engine(cache);
    let root = engine.seed_root("root").expect("seed root");
    for i in 0..size {
        engine
            .place(&root.referral_code, &format!("m{i}"))
            .expect("place");
    }
    (engine, root)
}

/// Benchmark one root placement into trees of increasing size
fn bench_root_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("root_placement");

    for &size in &[100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("cached", size), &size, |b, &size| {
            let (engine, root) = grown(size, PositionCache::in_memory(CachePolicy::default()));
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                black_box(engine.place(&root.referral_code, &format!("bench-{n}")).expect("place"))
            })
        });

        group.bench_with_input(BenchmarkId::new("uncached", size), &size, |b, &size| {
            b.iter_batched(
                || grown(size, PositionCache::disabled()),
                |(engine, root)| {
                    black_box(engine.place(&root.referral_code, "bench").expect("place"))
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

/// Benchmark placements under random sponsors
fn bench_random_sponsors(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_sponsors");
    group.throughput(Throughput::Elements(1));

    for (label, cache) in [
        ("cached", PositionCache::in_memory(CachePolicy::default())),
        ("uncached", PositionCache::disabled()),
    ] {
        let (engine, root) = grown(2_000, cache);
        let mut codes = vec![root.referral_code.clone()];
        codes.extend(
            engine
                .store()
                .scan()
                .expect("scan")
                .into_iter()
                .map(|n| n.referral_code),
        );
        let mut rng = StdRng::seed_from_u64(7);
        let mut n = 0u64;

        group.bench_function(label, |b| {
            b.iter(|| {
                n += 1;
                let code = &codes[rng.gen_range(0..codes.len())];
                black_box(engine.place(code, &format!("r{n}")).expect("place"))
            })
        });
    }
    group.finish();
}

/// Benchmark root downline stats
fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");

    for &size in &[1_000usize, 10_000] {
        let (engine, _) = grown(size, PositionCache::in_memory(CachePolicy::default()));
        group.bench_with_input(BenchmarkId::new("recompute", size), &size, |b, _| {
            b.iter(|| black_box(engine.stats_calculator().recompute("root").expect("stats")))
        });
        group.bench_with_input(BenchmarkId::new("cached", size), &size, |b, _| {
            b.iter(|| black_box(engine.stats("root").expect("stats")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_root_placement, bench_random_sponsors, bench_stats);
criterion_main!(benches);
