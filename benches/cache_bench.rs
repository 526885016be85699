use acorn::byteview::ByteView;
use acorn::lru::LruCache;
use acorn::persistence::WriteSequence;
use acorn::ring::HashRing;
use criterion::{criterion_group, criterion_main, Criterion};
use once_cell::sync::Lazy;
use rand::prelude::*;
use tempfile::TempDir;

static SEED_VALUES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut seeds = Vec::new();
    for _ in 0..=100 {
        seeds.push(rand::thread_rng().gen_range(0..100000).to_string());
    }
    seeds
});

pub fn lru(c: &mut Criterion) {
    let mut cache: LruCache<ByteView> = LruCache::new(0, None);

    c.bench_function("lru_add", |b| {
        b.iter(|| {
            for (i, seed) in SEED_VALUES.iter().enumerate() {
                cache.add(&i.to_string(), ByteView::from(seed.as_str()));
            }
        })
    });

    c.bench_function("lru_get", |b| {
        b.iter(|| {
            for (i, seed) in SEED_VALUES.iter().enumerate() {
                let v = cache.get(&i.to_string()).unwrap();
                assert_eq!(v.as_slice(), seed.as_bytes());
            }
        })
    });
}

pub fn write_sequence(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let seq = WriteSequence::open(temp_dir.path(), None).unwrap();

    c.bench_function("log_put", |b| {
        b.iter(|| {
            for (i, seed) in SEED_VALUES.iter().enumerate() {
                seq.put(&i.to_string(), seed.as_bytes()).unwrap();
            }
        })
    });

    c.bench_function("log_get", |b| {
        b.iter(|| {
            for (i, seed) in SEED_VALUES.iter().enumerate() {
                let v = seq.get(&i.to_string()).unwrap();
                assert_eq!(v, seed.as_bytes());
            }
        })
    });
}

pub fn ring(c: &mut Criterion) {
    let mut ring = HashRing::new(50, None);
    ring.add(["10.0.0.1:4000", "10.0.0.2:4000", "10.0.0.3:4000"]);

    c.bench_function("ring_get", |b| {
        b.iter(|| {
            for seed in SEED_VALUES.iter() {
                ring.get(seed).unwrap();
            }
        })
    });
}

criterion_group!(benches, lru, write_sequence, ring);
criterion_main!(benches);
