use arrayvec::ArrayVec;
use glam::Vec3;

use super::Sphere;
use crate::OCTANT_OFFSETS;

/// Axis-aligned cube described by its center and the half-width along
/// each axis. Every octree node owns one of these.
///
/// The faces are stored rather than recomputed from the center. A child's
/// inner faces are exactly its parent's center, the plane samples are
/// routed by, so a sample is always inside the box of the leaf it was
/// routed to, even when the child center itself had to be rounded.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Cube {
    center: Vec3,
    half_extent: Vec3,
    min: Vec3,
    max: Vec3,
}

impl Cube {
    pub fn new(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            center,
            half_extent,
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    #[inline]
    pub fn half_extent(&self) -> Vec3 {
        self.half_extent
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.max
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.half_extent * 2.0
    }

    /// Boundaries are inclusive on both sides, so a point on a shared
    /// face is contained by both neighbours.
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Index of the octant `point` falls into.
    ///
    /// ```text
    /// bit 0 -> x, bit 1 -> y, bit 2 -> z
    /// a set bit means the point is on the positive side of the center
    /// ```
    /// A coordinate equal to the center goes to the upper half.
    #[inline]
    pub fn octant_index(&self, point: Vec3) -> usize {
        let mut index = 0;
        if point.x >= self.center.x { index |= 1; }
        if point.y >= self.center.y { index |= 2; }
        if point.z >= self.center.z { index |= 4; }
        index
    }

    /// Bounds of the child cube at `index`. Its half extent is exactly half
    /// of ours and its center sits a quarter of our size away from ours.
    /// The face it shares with its siblings is our center.
    pub fn octant(&self, index: usize) -> Cube {
        let half_extent = self.half_extent / 2.0;
        let upper = OCTANT_OFFSETS[index].cmpgt(Vec3::ZERO);
        Cube {
            center: self.center + OCTANT_OFFSETS[index] * half_extent,
            half_extent,
            min: Vec3::select(upper, self.center, self.min),
            max: Vec3::select(upper, self.max, self.center),
        }
    }

    pub fn subdivide(&self) -> [Cube; 8] {
        let cells: ArrayVec<Cube, 8> = (0..8).map(|index| self.octant(index)).collect();
        // Exactly 8 items were collected
        match cells.into_inner() {
            Ok(cells) => cells,
            Err(_) => unreachable!(),
        }
    }

    /// Whether children would still have a non-zero extent on every axis.
    /// Past that point halving can no longer separate points.
    #[inline]
    pub fn can_halve(&self) -> bool {
        (self.half_extent / 2.0).cmpgt(Vec3::ZERO).all()
    }

    /// Squared distance from `point` to the closest point of the cube, zero
    /// when the point lies inside.
    pub fn distance_squared_to(&self, point: Vec3) -> f32 {
        let outside = (self.min - point).max(point - self.max).max(Vec3::ZERO);
        outside.length_squared()
    }

    /// True unless the sphere is strictly farther away than its radius.
    /// A sphere that only touches a face still intersects, so a zero radius
    /// query sitting inside the cube is never pruned.
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.distance_squared_to(sphere.origin) <= sphere.radius_squared()
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }
}

#[test]
fn octant_index_boundary_goes_up() {
    let cube = Cube::new(Vec3::ZERO, Vec3::splat(50.0));

    assert_eq!(cube.octant_index(Vec3::new(0.0, -1.0, -1.0)), 1);
    assert_eq!(cube.octant_index(Vec3::new(-1.0, 0.0, -1.0)), 2);
    assert_eq!(cube.octant_index(Vec3::new(-1.0, -1.0, 0.0)), 4);
    assert_eq!(cube.octant_index(Vec3::ZERO), 7);
    assert_eq!(cube.octant_index(Vec3::splat(-0.001)), 0);
}

#[test]
fn octree_subdivide_test() {
    let cube = Cube::new(Vec3::new(10.0, 0.0, -10.0), Vec3::new(8.0, 4.0, 2.0));

    let children = cube.subdivide();
    for (index, child) in children.iter().enumerate() {
        assert_eq!(child.half_extent(), Vec3::new(4.0, 2.0, 1.0));
        // Every child center routes back to its own octant
        assert_eq!(cube.octant_index(child.center()), index);
        assert!(cube.contains_point(child.min()) && cube.contains_point(child.max()));
    }
    assert_eq!(children[0].center(), Vec3::new(6.0, -2.0, -11.0));
    assert_eq!(children[7].center(), Vec3::new(14.0, 2.0, -9.0));
    assert_eq!(children[0].max(), cube.center());
    assert_eq!(children[7].min(), cube.center());
}

#[test]
fn octant_faces_are_the_split_planes() {
    // Centers and extents that do not halve exactly in f32
    for k in 1..200 {
        let center = Vec3::splat(k as f32 * 0.137);
        let half_extent = Vec3::splat(0.3 + k as f32 * 0.0173);
        let cube = Cube::new(center, half_extent);

        for (index, child) in cube.subdivide().iter().enumerate() {
            let face = Vec3::select(OCTANT_OFFSETS[index].cmpgt(Vec3::ZERO), child.min(), child.max());
            assert_eq!(face, cube.center());
            assert_eq!(child.distance_squared_to(cube.center()), 0.0);
        }

        // A point on the split plane is inside the child it routes to
        let on_plane = Vec3::new(center.x, center.y - half_extent.y * 0.4, center.z + half_extent.z * 0.2);
        let child = cube.octant(cube.octant_index(on_plane));
        assert_eq!(child.distance_squared_to(on_plane), 0.0);
        assert_eq!(cube.distance_squared_to(cube.max()), 0.0);
    }
}

#[test]
fn can_halve_stops_at_underflow() {
    assert!(Cube::new(Vec3::ZERO, Vec3::ONE).can_halve());
    // The smallest subnormal halves to zero
    let tiny = Cube::new(Vec3::ZERO, Vec3::new(1.0, f32::from_bits(1), 1.0));
    assert!(!tiny.can_halve());
}

#[test]
fn cube_distance_test() {
    let cube = Cube::new(Vec3::ZERO, Vec3::ONE);

    assert_eq!(cube.distance_squared_to(Vec3::new(0.5, -0.5, 0.0)), 0.0);
    assert_eq!(cube.distance_squared_to(Vec3::new(3.0, 0.0, 0.0)), 4.0);
    assert_eq!(cube.distance_squared_to(Vec3::new(2.0, -2.0, 0.0)), 2.0);

    assert!(cube.intersects_sphere(&Sphere::new(Vec3::new(3.0, 0.0, 0.0), 2.0)));
    assert!(!cube.intersects_sphere(&Sphere::new(Vec3::new(3.0, 0.0, 0.0), 1.9)));
    assert!(cube.intersects_sphere(&Sphere::new(Vec3::new(0.2, 0.2, 0.2), 0.0)));
}
