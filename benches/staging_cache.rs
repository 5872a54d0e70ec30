use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rustc_hash::FxHashMap;
use sorted_coo::{create_cache, CacheConfig, CacheKind, Coord, HashCache, LocalWorld, SlotCache, StagingCache};
use std::hint::black_box;

/// Skewed insert stream: a few hot coordinates plus a long tail
fn insert_stream(n: u64) -> Vec<(Coord, u64)> {
    (0..n)
        .map(|i| {
            let x = i.wrapping_mul(2654435761) % 100_003;
            let key = if x % 4 == 0 {
                Coord::new(x % 8, x % 5)
            } else {
                Coord::new(x % 997, x / 997)
            };
            (key, 1 + x % 7)
        })
        .collect()
}

fn drive(cache: &mut dyn StagingCache, stream: &[(Coord, u64)]) -> usize {
    let mut target: FxHashMap<Coord, u64> = FxHashMap::default();
    for &(key, value) in stream {
        cache.insert(&mut target, key, value);
    }
    cache.flush_all(&mut target);
    target.len()
}

/// Process-local designs without any communicator
fn bench_local_designs(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_staging");
    let stream = insert_stream(50_000);
    group.throughput(Throughput::Elements(stream.len() as u64));

    for slots in [1 << 10, 1 << 14] {
        group.bench_with_input(BenchmarkId::new("hash", slots), &slots, |b, &slots| {
            b.iter(|| {
                let mut cache = HashCache::new(slots, u64::MAX / 2);
                black_box(drive(&mut cache, &stream))
            })
        });
        group.bench_with_input(BenchmarkId::new("slot", slots), &slots, |b, &slots| {
            b.iter(|| {
                let mut cache = SlotCache::new(slots, u64::MAX / 2);
                black_box(drive(&mut cache, &stream))
            })
        });
    }
    group.finish();
}

/// Every design built through the factory on a one-rank world
fn bench_all_kinds(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging_kinds");
    group.sample_size(20);
    let stream = insert_stream(20_000);
    group.throughput(Throughput::Elements(stream.len() as u64));

    for kind in CacheKind::ALL {
        if kind.is_shared() && !cfg!(unix) {
            continue;
        }
        let config = CacheConfig::for_kind(kind).with_slots(1 << 12);
        group.bench_function(BenchmarkId::from_parameter(kind), |b| {
            b.iter(|| {
                let flushed = LocalWorld::new(1).run(|comm| match create_cache(&comm, &config) {
                    Ok(mut cache) => drive(cache.as_mut(), &stream),
                    Err(_) => 0,
                });
                black_box(flushed)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_local_designs, bench_all_kinds);
criterion_main!(benches);
