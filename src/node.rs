use ahash::AHashSet;
use glam::Vec3;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::{
    config::OctreeConfig,
    error::InvariantViolation,
    geometry::{Cube, Sphere},
    SampleRef,
};

/// One cube of the octree.
///
/// A node is either a leaf, holding samples and no children, or internal,
/// holding all 8 children and no samples. The switch from leaf to internal
/// happens once, under the node's write lock, and is never undone.
///
/// Geometry is fixed at construction and read without locking. The
/// children slot is written once and is also read without locking, which
/// lets inserts route through internal nodes without touching their lock.
#[derive(Debug)]
pub struct Node {
    bounds: Cube,
    depth: u32,
    samples: RwLock<Vec<SampleRef>>,
    children: OnceLock<Box<[Node; 8]>>,
}

/// Counters gathered by walking the tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub leaf_nodes: usize,
    pub internal_nodes: usize,
    pub samples: usize,
    pub max_depth: u32,
    /// Leaves past the depth limit that grew beyond the leaf capacity
    pub overflow_leaves: usize,
}

impl Node {
    /// Creates an empty leaf.
    pub(crate) fn new(bounds: Cube, depth: u32, capacity: usize) -> Self {
        Self {
            bounds,
            depth,
            samples: RwLock::new(Vec::with_capacity(capacity)),
            children: OnceLock::new(),
        }
    }

    // A panic while the write lock is held cannot leave a half-split node:
    // children are published in one step after they are fully populated.
    // Recovering a poisoned guard is therefore safe.
    fn read_samples(&self) -> RwLockReadGuard<'_, Vec<SampleRef>> {
        self.samples.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_samples(&self) -> RwLockWriteGuard<'_, Vec<SampleRef>> {
        self.samples.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn bounds(&self) -> Cube {
        self.bounds
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    #[inline]
    pub fn half_extent(&self) -> Vec3 {
        self.bounds.half_extent()
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_leaf(&self) -> bool {
        self.children.get().is_none()
    }

    pub fn children(&self) -> Option<&[Node; 8]> {
        self.children.get().map(|children| &**children)
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children().and_then(|children| children.get(index))
    }

    /// Number of samples stored directly in this node. Always zero once the
    /// node is internal.
    pub fn sample_count(&self) -> usize {
        self.read_samples().len()
    }

    /// Handles to the samples stored directly in this node.
    pub fn samples(&self) -> Vec<SampleRef> {
        self.read_samples().clone()
    }

    /// Stores `sample` somewhere in this subtree. Always succeeds; the only
    /// failure mode is allocation failure, which aborts.
    pub(crate) fn insert(&self, sample: SampleRef, config: &OctreeConfig) -> bool {
        // Internal nodes never change again, routing through them is lock free
        if let Some(children) = self.children.get() {
            return self.route(children, sample, config);
        }

        let mut samples = self.write_samples();

        // Someone else split this node while we waited for the lock
        if let Some(children) = self.children.get() {
            drop(samples);
            return self.route(children, sample, config);
        }

        if samples.len() < config.capacity || !self.can_subdivide(config) {
            // Past the depth limit the leaf keeps growing; Vec doubles its
            // storage whenever it runs out.
            samples.push(sample);
            return true;
        }

        self.subdivide(&mut samples, sample, config);
        true
    }

    /// Full leaves split only within the depth limit, and only while halving
    /// still leaves a non-zero extent.
    fn can_subdivide(&self, config: &OctreeConfig) -> bool {
        config.can_subdivide(self.depth) && self.bounds.can_halve()
    }

    fn route(&self, children: &[Node; 8], sample: SampleRef, config: &OctreeConfig) -> bool {
        let index = self.bounds.octant_index(sample.position());
        trace!(depth = self.depth, index, "Routing sample to child");
        children[index].insert(sample, config)
    }

    /// Splits a full leaf. Must be called with this node's write lock held,
    /// `samples` being the guarded list.
    ///
    /// The children are built and filled before anybody can see them, then
    /// published together with the emptying of `samples`. A reader holding
    /// the read lock sees either the full leaf or the finished split.
    fn subdivide(&self, samples: &mut Vec<SampleRef>, incoming: SampleRef, config: &OctreeConfig) {
        debug!(
            depth = self.depth,
            center = %self.bounds.center(),
            half_extent = %self.bounds.half_extent(),
            "Subdividing node"
        );

        let children = Box::new(
            self.bounds
                .subdivide()
                .map(|cube| Node::new(cube, self.depth + 1, config.capacity)),
        );

        // The fresh children are private to this thread, their locks are
        // uncontended. A child may split again if everything lands in it.
        for sample in samples.iter().cloned().chain(std::iter::once(incoming)) {
            let index = self.bounds.octant_index(sample.position());
            children[index].insert(sample, config);
        }

        let published = self.children.set(children).is_ok();
        debug_assert!(published, "node subdivided twice");
        *samples = Vec::new();
    }

    /// Appends every sample of this subtree inside `sphere` to `results`.
    ///
    /// Subtrees whose cube lies strictly farther than the radius are skipped
    /// entirely. The read lock of an internal node is held until all of its
    /// children have been visited.
    pub(crate) fn search_region_into(&self, sphere: &Sphere, results: &mut Vec<SampleRef>) {
        // Geometry is immutable, the pruning test needs no lock
        if !self.bounds.intersects_sphere(sphere) {
            return;
        }

        let samples = self.read_samples();
        match self.children.get() {
            Some(children) => children
                .iter()
                .for_each(|child| child.search_region_into(sphere, results)),
            None => results.extend(
                samples
                    .iter()
                    .filter(|sample| sphere.contains(sample.position()))
                    .cloned(),
            ),
        }
    }

    /// Copies the handles stored in the leaf `target` would be inserted
    /// into.
    pub(crate) fn search_leaf(&self, target: Vec3) -> Vec<SampleRef> {
        let samples = self.read_samples();
        match self.children.get() {
            Some(children) => {
                // Never wait on a child while holding the parent
                drop(samples);
                let index = self.bounds.octant_index(target);
                match children.get(index) {
                    Some(child) => child.search_leaf(target),
                    None => Vec::new(),
                }
            }
            None => samples.clone(),
        }
    }

    pub(crate) fn collect_stats(&self, stats: &mut TreeStats, config: &OctreeConfig) {
        let samples = self.read_samples();
        stats.max_depth = stats.max_depth.max(self.depth);
        match self.children.get() {
            Some(children) => {
                stats.internal_nodes += 1;
                children
                    .iter()
                    .for_each(|child| child.collect_stats(stats, config));
            }
            None => {
                stats.leaf_nodes += 1;
                stats.samples += samples.len();
                if samples.len() > config.capacity {
                    stats.overflow_leaves += 1;
                }
            }
        }
    }

    /// Checks the structural invariants of this subtree. `route` holds the
    /// ancestors' bounds and the octant taken from each of them.
    pub(crate) fn validate(
        &self,
        config: &OctreeConfig,
        seen: &mut AHashSet<usize>,
        route: &mut Vec<(Cube, usize)>,
    ) -> Result<(), InvariantViolation> {
        let samples = self.read_samples();

        let Some(children) = self.children.get() else {
            if self.can_subdivide(config) && samples.len() > config.capacity {
                return Err(InvariantViolation::OverCapacity {
                    depth: self.depth,
                    samples: samples.len(),
                    capacity: config.capacity,
                });
            }

            for sample in samples.iter() {
                let position = sample.position();
                let misplaced = route
                    .iter()
                    .any(|(cube, index)| cube.octant_index(position) != *index);
                if misplaced {
                    return Err(InvariantViolation::Misplaced {
                        depth: self.depth,
                        x: sample.x,
                        y: sample.y,
                        z: sample.z,
                    });
                }
                if !seen.insert(Arc::as_ptr(sample) as usize) {
                    return Err(InvariantViolation::DuplicateSample {
                        x: sample.x,
                        y: sample.y,
                        z: sample.z,
                    });
                }
            }
            return Ok(());
        };

        if !samples.is_empty() {
            return Err(InvariantViolation::InternalHoldsSamples {
                depth: self.depth,
                samples: samples.len(),
            });
        }

        for (index, child) in children.iter().enumerate() {
            if child.bounds != self.bounds.octant(index) || child.depth != self.depth + 1 {
                return Err(InvariantViolation::ChildGeometry {
                    depth: self.depth,
                    index,
                });
            }

            route.push((self.bounds, index));
            let result = child.validate(config, seen, route);
            route.pop();
            result?;
        }
        Ok(())
    }
}

#[cfg(test)]
fn test_node(capacity: usize, max_depth: u32) -> (Node, OctreeConfig) {
    let config = OctreeConfig { capacity, max_depth };
    let node = Node::new(Cube::new(Vec3::ZERO, Vec3::splat(50.0)), 0, capacity);
    (node, config)
}

#[cfg(test)]
fn sample_ref(x: f32, y: f32, z: f32) -> SampleRef {
    Arc::new(crate::Sample::new(x, y, z))
}

#[test]
fn node_insert_single() {
    let (node, config) = test_node(10, 4);
    let sample = sample_ref(10.0, 20.0, 30.0);

    assert!(node.insert(sample.clone(), &config));
    assert!(node.is_leaf());
    assert_eq!(node.sample_count(), 1);
    assert!(Arc::ptr_eq(&node.samples()[0], &sample));
}

#[test]
fn node_subdivides_when_full() {
    let (node, config) = test_node(10, 4);

    // 10 in the negative octant, the 11th in the positive one
    for i in 1..=10 {
        let v = -(i as f32);
        node.insert(sample_ref(v, v, v), &config);
    }
    assert!(node.is_leaf());
    node.insert(sample_ref(5.0, 5.0, 5.0), &config);

    assert!(!node.is_leaf());
    assert_eq!(node.sample_count(), 0);
    let children = node.children().unwrap();
    assert_eq!(children[0].sample_count(), 10);
    assert_eq!(children[7].sample_count(), 1);
    for child in &children[1..7] {
        assert!(child.is_leaf());
        assert_eq!(child.sample_count(), 0);
    }
    for child in children.iter() {
        assert_eq!(child.depth(), 1);
        assert_eq!(child.half_extent(), Vec3::splat(25.0));
    }
    assert_eq!(children[0].center(), Vec3::splat(-25.0));
    assert_eq!(children[7].center(), Vec3::splat(25.0));
}

#[test]
fn node_recursive_subdivision() {
    let (node, config) = test_node(10, 4);

    // All in octant 7, so the child splits as well
    for i in 0..11 {
        let v = i as f32 + 1.0;
        node.insert(sample_ref(v, v, v), &config);
    }

    let child = node.child(7).unwrap();
    assert!(!child.is_leaf());
    assert_eq!(child.sample_count(), 0);
    let grandchildren: usize = child
        .children()
        .unwrap()
        .iter()
        .map(Node::sample_count)
        .sum();
    assert_eq!(grandchildren, 11);
}

#[test]
fn node_past_max_depth_grows() {
    let (node, config) = test_node(2, 1);

    // Coincident points can never be separated
    let samples: Vec<_> = (0..50).map(|_| sample_ref(1.0, 1.0, 1.0)).collect();
    samples.iter().for_each(|s| {
        node.insert(s.clone(), &config);
    });

    // depth 0 and 1 split, depth 2 is the catch-all
    let leaf = node.child(7).and_then(|c| c.child(0)).unwrap();
    assert_eq!(leaf.depth(), 2);
    assert!(leaf.is_leaf());
    assert_eq!(leaf.sample_count(), 50);

    let mut stats = TreeStats::default();
    node.collect_stats(&mut stats, &config);
    assert_eq!(stats.samples, 50);
    assert_eq!(stats.internal_nodes, 2);
    assert_eq!(stats.leaf_nodes, 15);
    assert_eq!(stats.max_depth, 2);
    assert_eq!(stats.overflow_leaves, 1);

    let mut seen = AHashSet::new();
    assert_eq!(node.validate(&config, &mut seen, &mut Vec::new()), Ok(()));
    assert_eq!(seen.len(), 50);
}

#[test]
fn node_search_leaf_copies_bucket() {
    let (node, config) = test_node(10, 4);
    node.insert(sample_ref(10.0, 10.0, 10.0), &config);
    node.insert(sample_ref(20.0, 20.0, 20.0), &config);

    // Unsplit root: everything shares the one bucket, even far points
    let bucket = node.search_leaf(Vec3::new(-40.0, -40.0, -40.0));
    assert_eq!(bucket.len(), 2);
    assert_eq!(bucket.capacity(), 2);

    let (empty, _) = test_node(10, 4);
    assert!(empty.search_leaf(Vec3::ZERO).is_empty());
}

#[test]
fn node_validate_detects_duplicates() {
    let (node, config) = test_node(10, 4);
    let sample = sample_ref(1.0, 2.0, 3.0);
    node.insert(sample.clone(), &config);
    node.insert(sample, &config);

    let result = node.validate(&config, &mut AHashSet::new(), &mut Vec::new());
    assert_eq!(
        result,
        Err(InvariantViolation::DuplicateSample { x: 1.0, y: 2.0, z: 3.0 })
    );
}

#[test]
fn node_stops_splitting_when_extent_underflows() {
    // Deepest allowed limit, but the cube runs out of f32 precision first
    let config = OctreeConfig { capacity: 1, max_depth: crate::config::DEPTH_LIMIT };
    let half_extent = Vec3::splat(f32::MIN_POSITIVE);
    let node = Node::new(Cube::new(Vec3::ZERO, half_extent), 0, 1);

    for _ in 0..3 {
        assert!(node.insert(sample_ref(0.0, 0.0, 0.0), &config));
    }

    let mut stats = TreeStats::default();
    node.collect_stats(&mut stats, &config);
    assert_eq!(stats.samples, 3);
    assert!(stats.max_depth < config.max_depth);

    let bucket = node.search_leaf(Vec3::ZERO);
    assert_eq!(bucket.len(), 3);
    assert_eq!(node.validate(&config, &mut AHashSet::new(), &mut Vec::new()), Ok(()));
}

#[test]
fn node_coincident_points_at_depth_limit() {
    let config = OctreeConfig { capacity: 1, max_depth: crate::config::DEPTH_LIMIT };
    let (node, _) = test_node(1, 0);

    for _ in 0..3 {
        assert!(node.insert(sample_ref(1.0, 1.0, 1.0), &config));
    }

    let mut stats = TreeStats::default();
    node.collect_stats(&mut stats, &config);
    assert_eq!(stats.samples, 3);
    assert_eq!(stats.max_depth, config.max_depth + 1);
    assert_eq!(stats.overflow_leaves, 1);
}
