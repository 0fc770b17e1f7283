#![warn(unused_extern_crates)]
//! Concurrent point octree for 3D sample clouds such as LIDAR returns.
//!
//! Writers insert and readers query the same [`Octree`] from any number of
//! threads while it subdivides underneath them. Each node guards its own
//! state with a reader/writer lock; there is no global lock.

pub mod geometry;
use glam::{ Vec3, vec3 };

pub use glam;

/// Direction of each octant's center from its parent's center.
/// Bit 0 of the index selects +x, bit 1 +y, bit 2 +z.
pub const OCTANT_OFFSETS: [Vec3; 8] = [
    vec3(-1.0,-1.0,-1.0),
    vec3( 1.0,-1.0,-1.0),
    vec3(-1.0, 1.0,-1.0),
    vec3( 1.0, 1.0,-1.0),
    vec3(-1.0,-1.0, 1.0),
    vec3( 1.0,-1.0, 1.0),
    vec3(-1.0, 1.0, 1.0),
    vec3( 1.0, 1.0, 1.0),
];

mod sample;
pub use sample::*;

mod node;
pub use node::*;

mod octree;
pub use octree::*;

pub mod config;
pub use config::{ OctreeConfig, CAPACITY, MAX_DEPTH, DEPTH_LIMIT };

pub mod error;
pub use error::{ OctreeError, InvariantViolation };
