use ahash::AHashSet;
use glam::Vec3;
use ordered_float::OrderedFloat;
use std::sync::Arc;
use tracing::{info, warn, Level};

use crate::{
    config::OctreeConfig,
    error::{InvariantViolation, OctreeError, Result},
    geometry::{Cube, Sphere},
    Node, Sample, SampleRef, TreeStats,
};

/// Starting size of a region search accumulator.
const REGION_RESULTS_CAPACITY: usize = 16;

/// Concurrent point octree.
///
/// All operations take `&self`: share the tree between threads with a
/// scoped thread or an `Arc`, and insert and search from all of them at
/// once. Every node carries its own reader/writer lock, so writers only
/// contend when they hit the same leaf.
///
/// Samples outside the root cube are rejected by [`Octree::insert`]; the
/// tree never grows its bounds.
///
/// ```
/// use lidar_octree::{Octree, Sample};
/// use lidar_octree::glam::Vec3;
///
/// let tree = Octree::new(Vec3::ZERO, Vec3::splat(50.0)).unwrap();
/// assert!(tree.insert(Sample::new(1.0, 2.0, 3.0)));
/// assert!(tree.insert(Sample::new(-20.0, 0.0, 4.0)));
///
/// let near = tree.search_region(Vec3::ZERO, 5.0);
/// assert_eq!(near.len(), 1);
/// ```
#[derive(Debug)]
pub struct Octree {
    root: Node,
    config: OctreeConfig,
}

impl Octree {
    /// Creates an empty tree covering `center ± half_extent` with the
    /// default leaf capacity and depth limit.
    pub fn new(center: Vec3, half_extent: Vec3) -> Result<Self> {
        Self::with_config(center, half_extent, OctreeConfig::default())
    }

    pub fn with_config(center: Vec3, half_extent: Vec3, config: OctreeConfig) -> Result<Self> {
        config.validate()?;

        let bounds = Cube::new(center, half_extent);
        if !bounds.is_finite() || !half_extent.cmpgt(Vec3::ZERO).all() {
            return Err(OctreeError::InvalidGeometry { center, half_extent });
        }

        Ok(Self {
            root: Node::new(bounds, 0, config.capacity),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    #[inline]
    pub fn bounds(&self) -> Cube {
        self.root.bounds()
    }

    /// Root node, for inspecting the tree's shape.
    #[inline]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Stores a copy of `sample`. Once this returns `true` the sample is
    /// reachable from exactly one leaf.
    ///
    /// Returns `false` and stores nothing when the sample has a non-finite
    /// coordinate or lies outside the root cube. The tree never grows its
    /// bounds, and a sample outside them could not be found by
    /// [`Octree::search_region`], whose pruning trusts the node cubes.
    pub fn insert<S: Into<Sample>>(&self, sample: S) -> bool {
        self.insert_ref(Arc::new(sample.into()))
    }

    /// Stores the handle itself; searches return clones of this very `Arc`.
    ///
    /// Returns `false` without storing anything if the sample has a
    /// non-finite coordinate or lies outside the root cube, see
    /// [`Octree::insert`].
    pub fn insert_ref(&self, sample: SampleRef) -> bool {
        if !sample.is_finite() || !self.root.bounds().contains_point(sample.position()) {
            warn!(
                x = sample.x,
                y = sample.y,
                z = sample.z,
                "Rejected sample outside the octree bounds"
            );
            return false;
        }
        self.root.insert(sample, &self.config)
    }

    /// Inserts every sample, returning how many were accepted.
    pub fn insert_batch<S, I>(&self, samples: I) -> usize
    where
        S: Into<Sample>,
        I: IntoIterator<Item = S>,
    {
        samples.into_iter().map(|s| self.insert(s)).filter(|ok| *ok).count()
    }

    /// Every stored sample within `radius` of `center`, boundary included.
    ///
    /// A negative or NaN radius matches nothing. The order of the result
    /// follows the tree layout; see [`Octree::search_region_sorted`].
    pub fn search_region<P: Into<Vec3>>(&self, center: P, radius: f32) -> Vec<SampleRef> {
        let sphere = Sphere::new(center.into(), radius);
        if sphere.is_degenerate() {
            return Vec::new();
        }

        // Private to this call, no other search ever sees it
        let mut results = Vec::with_capacity(REGION_RESULTS_CAPACITY);
        self.root.search_region_into(&sphere, &mut results);
        results.shrink_to_fit();
        results
    }

    /// Same set as [`Octree::search_region`], closest first.
    pub fn search_region_sorted<P: Into<Vec3>>(&self, center: P, radius: f32) -> Vec<SampleRef> {
        let center = center.into();
        let mut results = self.search_region(center, radius);
        results.sort_by_cached_key(|sample| OrderedFloat(sample.position().distance_squared(center)));
        results
    }

    /// Contents of the leaf `target` falls into.
    ///
    /// This is a bucket lookup, not a proximity query. Close samples stored
    /// in a neighbouring leaf are missed, and everything in the bucket is
    /// returned no matter how far from `target` it lies. Use it as a cheap
    /// locality hint; use [`Octree::search_region`] for exact answers.
    pub fn search_leaf<P: Into<Vec3>>(&self, target: P) -> Vec<SampleRef> {
        self.root.search_leaf(target.into())
    }

    /// Number of stored samples. Only exact when no insert is in flight.
    pub fn len(&self) -> usize {
        self.stats().samples
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        self.root.collect_stats(&mut stats, &self.config);
        stats
    }

    /// Walks the whole tree checking its structural invariants: leaves and
    /// internal nodes are exclusive, leaves within the depth limit respect
    /// the capacity, children have the geometry of their octant, and every
    /// sample is stored once, in the leaf it routes to.
    pub fn validate(&self) -> std::result::Result<(), InvariantViolation> {
        let mut seen = AHashSet::new();
        let mut route = Vec::new();
        self.root.validate(&self.config, &mut seen, &mut route)
    }

    /// Tears the tree down. Taking `self` guarantees nothing else is using
    /// it; the node graph is released recursively, children first.
    pub fn destroy(self) {
        // Counting means visiting every node, only worth it if someone listens
        if tracing::enabled!(Level::INFO) {
            let stats = self.stats();
            info!(
                samples = stats.samples,
                nodes = stats.leaf_nodes + stats.internal_nodes,
                "Destroying octree"
            );
        }
        drop(self);
    }
}

#[cfg(feature = "multi-thread")]
impl Octree {
    /// Parallel [`Octree::insert_batch`] on the rayon pool.
    pub fn par_insert_batch<S>(&self, samples: Vec<S>) -> usize
    where
        S: Into<Sample> + Send,
    {
        use rayon::prelude::*;

        samples
            .into_par_iter()
            .map(|s| self.insert(s))
            .filter(|ok| *ok)
            .count()
    }

    /// Runs many region searches on the rayon pool, one result per query.
    pub fn par_search_regions(&self, queries: &[(Vec3, f32)]) -> Vec<Vec<SampleRef>> {
        use rayon::prelude::*;

        queries
            .par_iter()
            .map(|&(center, radius)| self.search_region(center, radius))
            .collect()
    }
}

#[cfg(test)]
fn scenario_tree() -> Octree {
    let config = OctreeConfig { capacity: 10, max_depth: 16 };
    Octree::with_config(Vec3::ZERO, Vec3::splat(50.0), config).unwrap()
}

#[test]
fn octree_rejects_bad_geometry() {
    assert!(matches!(
        Octree::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0)),
        Err(OctreeError::InvalidGeometry { .. })
    ));
    assert!(Octree::new(Vec3::splat(f32::NAN), Vec3::ONE).is_err());
    assert!(Octree::new(Vec3::ZERO, Vec3::splat(f32::INFINITY)).is_err());
    assert!(matches!(
        Octree::with_config(Vec3::ZERO, Vec3::ONE, OctreeConfig { capacity: 0, max_depth: 1 }),
        Err(OctreeError::InvalidConfig(_))
    ));
}

#[test]
fn octree_rejects_outside_samples() {
    let tree = scenario_tree();
    assert!(!tree.insert(Sample::new(50.1, 0.0, 0.0)));
    assert!(!tree.insert(Sample::new(f32::NAN, 0.0, 0.0)));
    assert!(tree.insert(Sample::new(50.0, -50.0, 50.0)));
    assert_eq!(tree.len(), 1);
}

#[test]
fn octree_insert_leaves_tree_untouched_on_rejection() {
    let tree = scenario_tree();
    for i in 0..12 {
        tree.insert(Sample::new(-40.0 + i as f32, 10.0, 10.0));
    }
    let before = tree.stats();

    assert!(!tree.insert(Sample::new(0.0, 0.0, -50.5)));
    assert!(!tree.insert(Sample::new(f32::INFINITY, 0.0, 0.0)));
    assert!(!tree.insert_ref(Arc::new(Sample::new(0.0, f32::NEG_INFINITY, 0.0))));

    assert_eq!(tree.stats(), before);
    assert!(tree.search_region(Vec3::new(0.0, 0.0, -50.5), 1.0).is_empty());
    assert!(tree.validate().is_ok());
}

#[test]
fn octree_negative_octant_scenario() {
    let tree = scenario_tree();
    for i in 1..=10 {
        let v = -(i as f32) * 4.0;
        assert!(tree.insert(Sample::new(v, v, v)));
    }
    assert!(tree.insert(Sample::new(10.0, 10.0, 10.0)));

    let root = tree.root();
    assert!(!root.is_leaf());
    assert_eq!(root.sample_count(), 0);
    let counts: Vec<usize> = root.children().unwrap().iter().map(Node::sample_count).collect();
    assert_eq!(counts, vec![10, 0, 0, 0, 0, 0, 0, 1]);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn octree_zero_radius_hits_exact_sample() {
    let tree = scenario_tree();
    let target = Arc::new(Sample::new(3.5, -2.25, 7.0));
    tree.insert_ref(target.clone());
    tree.insert(Sample::new(3.5, -2.25, 7.001));

    let found = tree.search_region(target.position(), 0.0);
    assert_eq!(found.len(), 1);
    assert!(Arc::ptr_eq(&found[0], &target));
}

#[test]
fn octree_region_search_filters_by_distance() {
    let tree = scenario_tree();
    for i in 0..40 {
        let x = i as f32 - 20.0;
        tree.insert(Sample::new(x, 0.0, 0.0));
    }

    // Radius boundary is inclusive
    let found = tree.search_region(Vec3::new(0.0, 0.0, 0.0), 3.0);
    let mut xs: Vec<f32> = found.iter().map(|s| s.x).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(xs, vec![-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0]);

    let sorted = tree.search_region_sorted(Vec3::new(10.2, 0.0, 0.0), 1.5);
    let xs: Vec<f32> = sorted.iter().map(|s| s.x).collect();
    assert_eq!(xs, vec![10.0, 11.0, 9.0]);

    assert!(tree.search_region(Vec3::ZERO, -1.0).is_empty());
    assert!(tree.search_region(Vec3::new(45.0, 45.0, 45.0), 5.0).is_empty());
}

#[test]
fn octree_search_is_idempotent() {
    let tree = scenario_tree();
    for i in 0..200 {
        let t = i as f32;
        tree.insert(Sample::new((t * 7.3) % 90.0 - 45.0, (t * 3.1) % 90.0 - 45.0, (t * 5.7) % 90.0 - 45.0));
    }

    let first = tree.search_region(Vec3::new(5.0, -5.0, 0.0), 35.0);
    let second = tree.search_region(Vec3::new(5.0, -5.0, 0.0), 35.0);
    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    assert!(first.iter().zip(second.iter()).all(|(a, b)| Arc::ptr_eq(a, b)));

    let bucket = tree.search_leaf(Vec3::new(1.0, 1.0, 1.0));
    let again = tree.search_leaf(Vec3::new(1.0, 1.0, 1.0));
    assert_eq!(bucket, again);
}

#[test]
fn octree_destroy_releases_samples() {
    let tree = scenario_tree();
    let sample = Arc::new(Sample::new(1.0, 1.0, 1.0));
    tree.insert_ref(sample.clone());
    for i in 0..30 {
        tree.insert(Sample::new(i as f32, 0.5, -0.5));
    }
    assert_eq!(Arc::strong_count(&sample), 2);

    tree.destroy();
    assert_eq!(Arc::strong_count(&sample), 1);
}

#[test]
fn octree_destroy_with_info_logging() {
    let tree = scenario_tree();
    let sample = Arc::new(Sample::new(-3.0, 2.0, 1.0));
    tree.insert_ref(sample.clone());
    for i in 0..30 {
        tree.insert(Sample::new(0.5, i as f32, -0.5));
    }

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        assert!(tracing::enabled!(Level::INFO));
        tree.destroy();
    });
    assert_eq!(Arc::strong_count(&sample), 1);
}

#[test]
fn octree_zero_radius_hits_split_plane_sample() {
    let mut misses = 0;
    for k in 1..200 {
        // Geometry that does not halve exactly in f32
        let center = Vec3::splat(k as f32 * 0.137);
        let half_extent = Vec3::splat(0.3 + k as f32 * 0.0173);
        let tree = Octree::new(center, half_extent).unwrap();

        for i in 0..crate::CAPACITY {
            let t = (i as f32 + 1.0) / (crate::CAPACITY as f32 + 1.0);
            let offset = Vec3::new(-0.9 + t, 0.5 - t, 0.8 * t - 0.4);
            assert!(tree.insert(Sample::from(center + offset * half_extent)));
        }

        // Sits on the x split plane and forces the split
        let on_plane = Arc::new(Sample::new(
            center.x,
            center.y + half_extent.y * 0.3,
            center.z - half_extent.z * 0.7,
        ));
        assert!(tree.insert_ref(on_plane.clone()));
        assert!(!tree.root().is_leaf());

        let found = tree.search_region(on_plane.position(), 0.0);
        if found.len() != 1 || !Arc::ptr_eq(&found[0], &on_plane) {
            misses += 1;
        }

        // Corners of the root cube sit on its outer faces
        let corner = Arc::new(Sample::from(tree.bounds().max()));
        assert!(tree.insert_ref(corner.clone()));
        let found = tree.search_region(corner.position(), 0.0);
        assert!(found.iter().any(|s| Arc::ptr_eq(s, &corner)));
    }
    assert_eq!(misses, 0);
}
