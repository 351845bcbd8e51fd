use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;
use xorcas::{DigestTree, Hash};

fn hashes(n: usize) -> Vec<Hash> {
    (0..n as u64).map(|i| Hash::digest(&i.to_le_bytes())).collect()
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest_add");
    let batch = hashes(1_000);
    group.throughput(Throughput::Elements(batch.len() as u64));
    for &layers in &[2u32, 4, 6] {
        let dir = tempdir().unwrap();
        let mut tree = DigestTree::open(dir.path(), layers, 4).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(layers), &layers, |b, _| {
            // adding a batch twice restores the tree, so each iteration starts equal
            b.iter(|| {
                for h in &batch {
                    tree.add(h).unwrap();
                }
            })
        });
    }
    group.finish();
}

fn bench_get_leaf(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut tree = DigestTree::open(dir.path(), 6, 4).unwrap();
    let batch = hashes(10_000);
    for h in &batch {
        tree.add(h).unwrap();
    }

    let mut group = c.benchmark_group("digest_get_leaf");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("depth_24", |b| {
        b.iter(|| {
            let mut acc = Hash::ZERO;
            for h in &batch {
                acc ^= tree.get_leaf(h).unwrap();
            }
            criterion::black_box(acc)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_add, bench_get_leaf);
criterion_main!(benches);
