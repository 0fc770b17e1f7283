//! Benchmarks for the concurrent octree.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lidar_octree::glam::Vec3;
use lidar_octree::{Octree, Sample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

fn uniform_samples(seed: u64, count: usize) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Sample::new(
                rng.random_range(-50.0..50.0),
                rng.random_range(-50.0..50.0),
                rng.random_range(-50.0..50.0),
            )
        })
        .collect()
}

fn filled_tree(count: usize) -> Octree {
    let tree = Octree::new(Vec3::ZERO, Vec3::splat(50.0)).unwrap();
    tree.insert_batch(uniform_samples(0, count));
    tree
}

// ============================================================================
// Insert Benchmarks
// ============================================================================

fn bench_insert_10000(c: &mut Criterion) {
    let samples = uniform_samples(1, 10_000);
    c.bench_function("octree_insert_10000", |b| {
        b.iter(|| {
            let tree = Octree::new(Vec3::ZERO, Vec3::splat(50.0)).unwrap();
            tree.insert_batch(samples.iter().copied());
            black_box(tree)
        })
    });
}

fn bench_insert_10000_4_threads(c: &mut Criterion) {
    let batches: Vec<Arc<Vec<Sample>>> = (0..4)
        .map(|seed| Arc::new(uniform_samples(seed, 2_500)))
        .collect();
    c.bench_function("octree_insert_10000_4_threads", |b| {
        b.iter(|| {
            let tree = Arc::new(Octree::new(Vec3::ZERO, Vec3::splat(50.0)).unwrap());
            let handles: Vec<_> = batches
                .iter()
                .cloned()
                .map(|batch| {
                    let tree = tree.clone();
                    thread::spawn(move || tree.insert_batch(batch.iter().copied()))
                })
                .collect();
            for handle in handles {
                black_box(handle.join().unwrap());
            }
            black_box(tree)
        })
    });
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_search_region(c: &mut Criterion) {
    let tree = filled_tree(100_000);
    let centers = uniform_samples(2, 256);
    c.bench_function("octree_search_region_r5", |b| {
        b.iter(|| {
            for center in &centers {
                black_box(tree.search_region(*center, 5.0));
            }
        })
    });
}

fn bench_search_leaf(c: &mut Criterion) {
    let tree = filled_tree(100_000);
    let targets = uniform_samples(3, 256);
    c.bench_function("octree_search_leaf", |b| {
        b.iter(|| {
            for target in &targets {
                black_box(tree.search_leaf(*target));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_insert_10000,
    bench_insert_10000_4_threads,
    bench_search_region,
    bench_search_leaf,
);
criterion_main!(benches);
