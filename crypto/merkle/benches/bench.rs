use std::sync::Arc;

use blockstream_hashes::{Hash, hash_leaf};
use blockstream_merkle::{ConcurrentStreamingTreeHasher, NaiveStreamingTreeHasher, StreamingTreeHasher};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn leaves(count: usize) -> Vec<Hash> {
    (0..count).map(|i| hash_leaf(&(i as u64).to_be_bytes())).collect()
}

fn tree_hashers_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let pool = Arc::new(rayon::ThreadPoolBuilder::new().build().unwrap());
    let mut group = c.benchmark_group("tree root");
    for count in [1_000, 20_000] {
        let leaves = leaves(count);
        group.bench_with_input(BenchmarkId::new("naive", count), &leaves, |b, leaves| {
            b.iter(|| {
                let mut hasher = NaiveStreamingTreeHasher::new();
                hasher.add_leaves(leaves.iter().copied()).unwrap();
                black_box(runtime.block_on(hasher.root_hash()).unwrap())
            })
        });
        for chunk_size in [32, 128] {
            group.bench_with_input(BenchmarkId::new(format!("concurrent/{chunk_size}"), count), &leaves, |b, leaves| {
                b.iter(|| {
                    let mut hasher = ConcurrentStreamingTreeHasher::new(pool.clone(), chunk_size).unwrap();
                    hasher.add_leaves(leaves.iter().copied()).unwrap();
                    black_box(runtime.block_on(hasher.root_hash()).unwrap())
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, tree_hashers_benchmark);
criterion_main!(benches);
