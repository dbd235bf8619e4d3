use glam::{Vec2, Vec3};

mod pinhole;
pub use pinhole::PinholeCamera;

mod poly3;
pub use poly3::Poly3Camera;

/// Errors raised when building camera models.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CameraError {
    /// The parameter vector has the wrong length for the model.
    #[error("Expected {expected} camera parameters, got {actual}")]
    InvalidNumParams {
        /// Parameters required by the model.
        expected: usize,
        /// Parameters supplied.
        actual: usize,
    },

    /// A focal length is zero, negative or not finite.
    #[error("Invalid focal length ({0}, {1})")]
    InvalidFocalLength(f32, f32),
}

/// The capability set the registration pipeline needs from a camera model.
///
/// Pixel coordinates place the center of the top-left pixel at `(0, 0)`.
pub trait CameraModel: Clone + Send + Sync + std::fmt::Debug {
    /// The number of intrinsic parameters of the model.
    const NUM_PARAMS: usize;

    /// Project a point in the camera frame to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the image plane.
    fn project(&self, p: Vec3) -> Option<Vec2>;

    /// Back-project pixel `(u, v)` to the 3D point at depth `depth` along the optical axis.
    fn unproject(&self, uv: Vec2, depth: f32) -> Vec3;

    /// The model for an image resized by `factor`, e.g. `0.5` for one pyramid level down.
    fn scale(&self, factor: f32) -> Self;

    /// The intrinsic parameters, `NUM_PARAMS` values.
    fn params(&self) -> Vec<f32>;
}

/// Scale the principal point so that pixel centers stay aligned when an
/// image is resized by averaging blocks of `1 / factor` pixels.
#[inline]
pub(crate) fn scale_principal_point(c: f32, factor: f32) -> f32 {
    (c + 0.5) * factor - 0.5
}

pub(crate) fn check_focal_length(fx: f32, fy: f32) -> Result<(), CameraError> {
    if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
        return Err(CameraError::InvalidFocalLength(fx, fy));
    }
    Ok(())
}
