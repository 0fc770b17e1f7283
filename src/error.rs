//! Error types for building and checking an octree.
//!
//! Running out of memory is not represented here: allocation failure
//! aborts the process, there is nothing left worth recovering.

use glam::Vec3;

pub type Result<T> = std::result::Result<T, OctreeError>;

#[derive(Debug, thiserror::Error)]
pub enum OctreeError {
    /// Root bounds that cannot be subdivided into a meaningful tree
    #[error("invalid root geometry: center {center}, half extent {half_extent}")]
    InvalidGeometry { center: Vec3, half_extent: Vec3 },

    /// Configuration values out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),
}

/// A broken structural invariant found by [`crate::Octree::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("internal node at depth {depth} still holds {samples} samples")]
    InternalHoldsSamples { depth: u32, samples: usize },

    #[error("leaf at depth {depth} holds {samples} samples, capacity is {capacity}")]
    OverCapacity { depth: u32, samples: usize, capacity: usize },

    #[error("child {index} at depth {depth} does not match its parent's octant")]
    ChildGeometry { depth: u32, index: usize },

    #[error("sample ({x}, {y}, {z}) is stored more than once")]
    DuplicateSample { x: f32, y: f32, z: f32 },

    #[error("sample ({x}, {y}, {z}) does not route to its leaf at depth {depth}")]
    Misplaced { depth: u32, x: f32, y: f32, z: f32 },
}
