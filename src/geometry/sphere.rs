use glam::Vec3;

/// Query region of a radius search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub origin: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub const fn new(origin: Vec3, radius: f32) -> Self {
        Self { origin, radius }
    }

    #[inline(always)]
    pub fn radius_squared(&self) -> f32 {
        self.radius * self.radius
    }

    /// Inclusive: a point exactly `radius` away is inside.
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.distance_squared(self.origin) <= self.radius_squared()
    }

    /// Negative or NaN radius, or a non-finite origin. Such a sphere
    /// contains nothing.
    pub fn is_degenerate(&self) -> bool {
        !(self.radius >= 0.0) || !self.origin.is_finite()
    }
}

#[test]
fn sphere_contains_test() {
    let sphere = Sphere::new(Vec3::new(1.0, 1.0, 1.0), 2.0);
    assert!(sphere.contains(Vec3::new(3.0, 1.0, 1.0)));
    assert!(!sphere.contains(Vec3::new(3.0, 1.1, 1.0)));

    let point = Sphere::new(Vec3::splat(4.0), 0.0);
    assert!(point.contains(Vec3::splat(4.0)));
    assert!(!point.is_degenerate());

    assert!(Sphere::new(Vec3::ZERO, -1.0).is_degenerate());
    assert!(Sphere::new(Vec3::ZERO, f32::NAN).is_degenerate());
}
