//! Tuning knobs for an octree, loadable from TOML.
//!
//! ```toml
//! capacity = 10
//! max_depth = 16
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{OctreeError, Result};

/// Maximum samples a leaf holds before it subdivides.
pub const CAPACITY: usize = 10;

/// Nodes deeper than this never subdivide; their sample list grows instead.
pub const MAX_DEPTH: u32 = 16;

/// Largest accepted `max_depth`. Halving an `f32` extent this many times
/// leaves nothing to separate, and every level costs a stack frame on insert.
pub const DEPTH_LIMIT: u32 = 64;

fn default_capacity() -> usize {
    CAPACITY
}

fn default_max_depth() -> u32 {
    MAX_DEPTH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctreeConfig {
    /// Samples per leaf before subdivision
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Deepest level that may still subdivide
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            capacity: CAPACITY,
            max_depth: MAX_DEPTH,
        }
    }
}

impl OctreeConfig {
    pub fn new(capacity: usize, max_depth: u32) -> Result<Self> {
        let config = Self { capacity, max_depth };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(OctreeError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.max_depth > DEPTH_LIMIT {
            return Err(OctreeError::InvalidConfig(format!(
                "max_depth {} exceeds the limit of {}",
                self.max_depth, DEPTH_LIMIT
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(
            path = %path.display(),
            capacity = config.capacity,
            max_depth = config.max_depth,
            "Loaded octree configuration"
        );
        Ok(config)
    }

    /// Whether a full leaf at `depth` subdivides rather than growing.
    #[inline(always)]
    pub fn can_subdivide(&self, depth: u32) -> bool {
        depth <= self.max_depth
    }
}

#[test]
fn config_from_toml_test() {
    let config = OctreeConfig::from_toml_str("capacity = 4\nmax_depth = 3\n").unwrap();
    assert_eq!(config, OctreeConfig { capacity: 4, max_depth: 3 });

    let partial = OctreeConfig::from_toml_str("max_depth = 2").unwrap();
    assert_eq!(partial.capacity, CAPACITY);
    assert_eq!(partial.max_depth, 2);

    assert_eq!(OctreeConfig::from_toml_str("").unwrap(), OctreeConfig::default());
}

#[test]
fn config_rejects_bad_values() {
    assert!(matches!(
        OctreeConfig::from_toml_str("capacity = 0"),
        Err(OctreeError::InvalidConfig(_))
    ));
    assert!(matches!(
        OctreeConfig::from_toml_str("capacity = \"lots\""),
        Err(OctreeError::ConfigParse(_))
    ));
    assert!(matches!(
        OctreeConfig::load("/nonexistent/octree.toml"),
        Err(OctreeError::ConfigIo(_))
    ));
    assert!(OctreeConfig::new(0, 4).is_err());

    assert!(matches!(
        OctreeConfig::new(1, 100_000),
        Err(OctreeError::InvalidConfig(_))
    ));
    assert!(matches!(
        OctreeConfig::from_toml_str("max_depth = 65"),
        Err(OctreeError::InvalidConfig(_))
    ));
    assert!(OctreeConfig::new(1, DEPTH_LIMIT).is_ok());
}
