//! Umbrella crate re-exporting the registration stack.

#[doc(inline)]
pub use kornia_lie as lie;

#[doc(inline)]
pub use kornia_3d as k3d;

#[doc(inline)]
pub use kornia_icp as icp;
