use lidar_octree::glam::Vec3;
use lidar_octree::{Octree, OctreeConfig, Sample, SampleRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tree(capacity: usize, max_depth: u32) -> Arc<Octree> {
    init_logging();
    let config = OctreeConfig::new(capacity, max_depth).unwrap();
    Arc::new(Octree::with_config(Vec3::ZERO, Vec3::splat(50.0), config).unwrap())
}

fn random_samples(seed: u64, count: usize) -> Vec<SampleRef> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Arc::new(Sample::new(
                rng.random_range(-50.0..50.0),
                rng.random_range(-50.0..50.0),
                rng.random_range(-50.0..50.0),
            ))
        })
        .collect()
}

fn addresses(samples: &[SampleRef]) -> HashSet<usize> {
    samples.iter().map(|s| Arc::as_ptr(s) as usize).collect()
}

fn contains(samples: &[SampleRef], sample: &SampleRef) -> bool {
    samples.iter().any(|s| Arc::ptr_eq(s, sample))
}

#[test]
fn two_writers_share_unsplit_root() {
    let tree = tree(10, 16);
    let a = Arc::new(Sample::new(25.0, 25.0, 25.0));
    let b = Arc::new(Sample::new(-25.0, -25.0, -25.0));

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|sample| {
            let tree = tree.clone();
            thread::spawn(move || tree.insert_ref(sample))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert!(tree.root().is_leaf());
    assert_eq!(tree.root().sample_count(), 2);
    assert!(contains(&tree.search_leaf(a.position()), &a));
    assert!(contains(&tree.search_leaf(b.position()), &b));
}

#[test]
fn concurrent_writers_split_root() {
    let tree = tree(10, 16);
    let points = [
        (1.0, 1.0, 1.0),
        (2.0, 2.0, 2.0),
        (-3.0, -3.0, -3.0),
        (4.0, 4.0, -4.0),
        (-5.0, 5.0, -5.0),
        (6.0, -6.0, 6.0),
        (-7.0, -7.0, 7.0),
        (8.0, -8.0, -8.0),
        (9.0, 9.0, 9.0),
        (10.0, 10.0, 10.0),
        (-11.0, -11.0, -11.0),
    ];
    let samples: Vec<SampleRef> = points
        .iter()
        .map(|&(x, y, z)| Arc::new(Sample::new(x, y, z)))
        .collect();

    let handles: Vec<_> = samples
        .iter()
        .cloned()
        .map(|sample| {
            let tree = tree.clone();
            thread::spawn(move || tree.insert_ref(sample))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let root = tree.root();
    assert!(!root.is_leaf());
    assert_eq!(root.sample_count(), 0);
    let counts: Vec<usize> = root
        .children()
        .unwrap()
        .iter()
        .map(|child| child.sample_count())
        .collect();
    assert_eq!(counts, vec![2, 1, 1, 1, 1, 1, 0, 4]);

    for sample in &samples {
        assert!(contains(&tree.search_leaf(sample.position()), sample));
    }
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn concurrent_inserts_are_conserved() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_500;

    let tree = tree(10, 16);
    let batches: Vec<Vec<SampleRef>> = (0..THREADS)
        .map(|seed| random_samples(seed as u64, PER_THREAD))
        .collect();

    let handles: Vec<_> = batches
        .iter()
        .cloned()
        .map(|batch| {
            let tree = tree.clone();
            thread::spawn(move || batch.into_iter().filter(|s| tree.insert_ref(s.clone())).count())
        })
        .collect();
    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, THREADS * PER_THREAD);

    // Radius covering the whole cube, corner to corner
    let everything = tree.search_region(Vec3::ZERO, 50.0 * 3f32.sqrt() + 1.0);
    assert_eq!(everything.len(), THREADS * PER_THREAD);

    let found = addresses(&everything);
    assert_eq!(found.len(), THREADS * PER_THREAD);
    let inserted: HashSet<usize> = batches.iter().flat_map(|b| addresses(b)).collect();
    assert_eq!(found, inserted);

    assert_eq!(tree.len(), THREADS * PER_THREAD);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn leaf_readers_during_writes() {
    const READERS: usize = 4;
    const WRITES: usize = 400;

    // Large capacity keeps the target bucket a single leaf
    let tree = tree(1_000, 16);
    let target = Vec3::new(10.0, 10.0, 10.0);
    let written: Vec<SampleRef> = (0..WRITES)
        .map(|i| Arc::new(Sample::new(i as f32 * 0.1, 10.0, 10.0)))
        .collect();

    let writer = {
        let tree = tree.clone();
        let written = written.clone();
        thread::spawn(move || {
            for sample in written {
                assert!(tree.insert_ref(sample));
            }
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let tree = tree.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    let bucket = tree.search_leaf(target);
                    // Inserts into an unsplit leaf only ever append
                    assert!(bucket.len() >= last);
                    assert_eq!(addresses(&bucket).len(), bucket.len());
                    last = bucket.len();
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let bucket = tree.search_leaf(target);
    assert_eq!(bucket.len(), WRITES);
    for sample in &written {
        assert_eq!(bucket.iter().filter(|s| Arc::ptr_eq(s, sample)).count(), 1);
    }
}

#[test]
fn searches_during_subdivision() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 2_000;

    let tree = tree(8, 16);
    let batches: Vec<Vec<SampleRef>> = (0..WRITERS)
        .map(|seed| random_samples(100 + seed as u64, PER_WRITER))
        .collect();

    let writers: Vec<_> = batches
        .iter()
        .cloned()
        .map(|batch| {
            let tree = tree.clone();
            thread::spawn(move || {
                for sample in batch {
                    tree.insert_ref(sample);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..WRITERS)
        .map(|seed| {
            let tree = tree.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                for _ in 0..300 {
                    let center = Vec3::new(
                        rng.random_range(-50.0..50.0),
                        rng.random_range(-50.0..50.0),
                        rng.random_range(-50.0..50.0),
                    );
                    let region = tree.search_region(center, 10.0);
                    assert_eq!(addresses(&region).len(), region.len());
                    assert!(region
                        .iter()
                        .all(|s| s.position().distance_squared(center) <= 100.0));

                    let bucket = tree.search_leaf(center);
                    assert_eq!(addresses(&bucket).len(), bucket.len());
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    // Every sample is in the bucket it routes to
    for sample in batches.iter().flatten() {
        let bucket = tree.search_leaf(sample.position());
        assert_eq!(bucket.iter().filter(|s| Arc::ptr_eq(s, sample)).count(), 1);
    }
    assert_eq!(tree.len(), WRITERS * PER_WRITER);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn coincident_points_stop_at_depth_limit() {
    let tree = tree(4, 3);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tree = tree.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    assert!(tree.insert(Sample::new(-12.5, 3.0, 40.0)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = tree.stats();
    assert_eq!(stats.samples, 1_000);
    assert_eq!(stats.max_depth, 4);
    assert_eq!(stats.overflow_leaves, 1);
    assert_eq!(tree.search_leaf(Vec3::new(-12.5, 3.0, 40.0)).len(), 1_000);
    assert_eq!(tree.search_region(Vec3::new(-12.5, 3.0, 40.0), 0.0).len(), 1_000);
    assert_eq!(tree.validate(), Ok(()));
}

#[cfg(feature = "multi-thread")]
#[test]
fn rayon_batches() {
    let tree = tree(10, 16);
    let samples: Vec<Sample> = random_samples(7, 5_000).iter().map(|s| **s).collect();

    assert_eq!(tree.par_insert_batch(samples.clone()), 5_000);
    assert_eq!(tree.len(), 5_000);

    let queries: Vec<(Vec3, f32)> = samples
        .iter()
        .take(32)
        .map(|s| (s.position(), 3.0))
        .collect();
    let results = tree.par_search_regions(&queries);
    for ((center, radius), found) in queries.iter().zip(results) {
        assert_eq!(found.len(), tree.search_region(*center, *radius).len());
        assert!(!found.is_empty());
    }
}
