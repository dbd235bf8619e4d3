#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera models.
pub mod camera;

/// Organized 2D containers for points, normals and depth.
pub mod grid;

/// Surface normal estimation for organized point clouds.
pub mod normals;

/// Operations on organized point clouds.
pub mod ops;

/// Coarse-to-fine image pyramids.
pub mod pyramid;

/// Multi-camera rigs.
pub mod rig;
