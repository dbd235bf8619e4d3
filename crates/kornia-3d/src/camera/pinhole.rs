use glam::{Vec2, Vec3};

use super::{check_focal_length, scale_principal_point, CameraError, CameraModel};

/// A pinhole camera without distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    /// The focal length in the x direction
    pub fx: f32,
    /// The focal length in the y direction
    pub fy: f32,
    /// The x coordinate of the principal point
    pub cx: f32,
    /// The y coordinate of the principal point
    pub cy: f32,
}

impl PinholeCamera {
    /// Create a pinhole camera from its intrinsics.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self, CameraError> {
        check_focal_length(fx, fy)?;
        Ok(Self { fx, fy, cx, cy })
    }

    /// Create a pinhole camera from `[fx, fy, cx, cy]`.
    pub fn from_params(params: &[f32]) -> Result<Self, CameraError> {
        match *params {
            [fx, fy, cx, cy] => Self::new(fx, fy, cx, cy),
            _ => Err(CameraError::InvalidNumParams {
                expected: Self::NUM_PARAMS,
                actual: params.len(),
            }),
        }
    }
}

impl CameraModel for PinholeCamera {
    const NUM_PARAMS: usize = 4;

    #[inline]
    fn project(&self, p: Vec3) -> Option<Vec2> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Vec2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    #[inline]
    fn unproject(&self, uv: Vec2, depth: f32) -> Vec3 {
        Vec3::new(
            (uv.x - self.cx) / self.fx * depth,
            (uv.y - self.cy) / self.fy * depth,
            depth,
        )
    }

    fn scale(&self, factor: f32) -> Self {
        Self {
            fx: self.fx * factor,
            fy: self.fy * factor,
            cx: scale_principal_point(self.cx, factor),
            cy: scale_principal_point(self.cy, factor),
        }
    }

    fn params(&self) -> Vec<f32> {
        vec![self.fx, self.fy, self.cx, self.cy]
    }
}
