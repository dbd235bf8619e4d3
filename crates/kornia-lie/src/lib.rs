#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Lie Groups
//!
//! Single precision implementations of the rotation group SO(3) and the rigid
//! body transformation group SE(3), the two groups the registration pipeline
//! linearizes around.
//!
//! ## Example
//!
//! ```rust
//! use kornia_lie::se3::SE3;
//!
//! // a small rotation about z followed by a translation along x
//! let twist = [0.0, 0.0, 0.1, 0.5, 0.0, 0.0];
//! let pose = SE3::exp(&twist);
//!
//! let point = glam::Vec3::new(1.0, 0.0, 0.0);
//! let moved = pose.transform_point(point);
//! let back = pose.inverse().transform_point(moved);
//! assert!((back - point).length() < 1e-5);
//! ```

/// Special Euclidean group SE(3) for 3D rigid transformations.
pub mod se3;

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;

pub use se3::SE3;
pub use so3::SO3;
