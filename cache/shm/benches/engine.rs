//! Benchmarks for shm-cache hot paths.
//!
//! - get hit and miss (chain walk + value copy)
//! - set of new keys (allocation + link) and in-place updates
//!
//! Run with: cargo bench -p shm-cache --bench engine

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use shm_cache::{Flags, ShmCache};

/// Generate a key from an index.
fn make_key(index: usize) -> Vec<u8> {
    format!("key:{:016x}", index).into_bytes()
}

fn make_cache(max_items: u64, blocksize: u64) -> ShmCache {
    ShmCache::builder()
        .max_items(max_items)
        .blocksize(blocksize)
        .keysize(64)
        .hashsize(max_items)
        .build()
        .unwrap()
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("shm/get");

    for (num_items, value_size) in [(10_000usize, 64usize), (100_000, 64), (10_000, 1024)] {
        let cache = make_cache(num_items as u64, value_size as u64);
        let value = vec![0xAB; value_size];
        let keys: Vec<Vec<u8>> = (0..num_items).map(make_key).collect();
        for key in &keys {
            cache.set(key, &value, 0, Flags::NONE).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("hit", format!("{}items_{}B", num_items, value_size)),
            &num_items,
            |b, _| {
                let mut idx = 0usize;
                b.iter(|| {
                    let result = cache.with_value(black_box(&keys[idx]), |v| v.len());
                    black_box(result.ok());
                    idx = (idx + 1) % keys.len();
                });
            },
        );
    }

    let cache = make_cache(10_000, 64);
    for i in 0..10_000 {
        cache.set(&make_key(i), &[0xAB; 64], 0, Flags::NONE).unwrap();
    }
    let miss_keys: Vec<Vec<u8>> = (10_000..20_000).map(make_key).collect();

    group.bench_function("miss", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            black_box(cache.get(black_box(&miss_keys[idx])).ok());
            idx = (idx + 1) % miss_keys.len();
        });
    });

    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("shm/set");
    group.throughput(Throughput::Elements(1));

    // insert into a cache that is emptied whenever it fills up
    let cache = make_cache(100_000, 64);
    let value = [0xAB; 64];
    group.bench_function("new_key", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            if idx % 100_000 == 0 {
                cache.clear();
            }
            let _ = cache.set(black_box(&make_key(idx)), black_box(&value), 0, Flags::NONE);
            idx = idx.wrapping_add(1);
        });
    });

    let cache = make_cache(10_000, 64);
    let keys: Vec<Vec<u8>> = (0..10_000).map(make_key).collect();
    for key in &keys {
        cache.set(key, &value, 0, Flags::NONE).unwrap();
    }
    group.bench_function("update", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let _ = cache.set(black_box(&keys[idx]), black_box(&value), 0, Flags::UPDATE);
            idx = (idx + 1) % keys.len();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get, bench_set);
criterion_main!(benches);
