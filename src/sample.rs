use glam::Vec3;
use std::sync::Arc;

/// A single point of the cloud, e.g. one LIDAR return.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Shared handle to a stored sample. The tree owns one of these per sample
/// and query results hand out clones of the handle, never of the value.
pub type SampleRef = Arc<Sample>;

impl Sample {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline(always)]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    #[inline]
    pub fn distance_squared(&self, other: &Sample) -> f32 {
        self.position().distance_squared(other.position())
    }

    pub fn is_finite(&self) -> bool {
        self.position().is_finite()
    }
}

impl From<Vec3> for Sample {
    #[inline(always)]
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Sample> for Vec3 {
    #[inline(always)]
    fn from(s: Sample) -> Self {
        s.position()
    }
}

impl From<[f32; 3]> for Sample {
    #[inline(always)]
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

#[test]
fn sample_distance_test() {
    let a = Sample::new(1.0, 2.0, 3.0);
    let b = Sample::from([4.0, 6.0, 3.0]);
    assert_eq!(a.distance_squared(&b), 25.0);
    assert_eq!(Vec3::from(a), Vec3::new(1.0, 2.0, 3.0));
    assert!(!Sample::new(f32::INFINITY, 0.0, 0.0).is_finite());
}
