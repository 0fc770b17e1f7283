mod sphere;
pub use sphere::*;

mod cube;
pub use cube::*;
