use glam::{Vec2, Vec3};

use super::{check_focal_length, scale_principal_point, CameraError, CameraModel};

// fixed point iterations used to invert the radial distortion
const UNDISTORT_ITERATIONS: usize = 5;

/// A pinhole camera with a third order polynomial radial distortion.
///
/// The distorted normalized coordinates are `x * d(r)` with
/// `d(r) = 1 + k1 r^2 + k2 r^4 + k3 r^6`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Poly3Camera {
    /// The focal length in the x direction
    pub fx: f32,
    /// The focal length in the y direction
    pub fy: f32,
    /// The x coordinate of the principal point
    pub cx: f32,
    /// The y coordinate of the principal point
    pub cy: f32,
    /// The radial distortion coefficients `[k1, k2, k3]`
    pub k: [f32; 3],
}

impl Poly3Camera {
    /// Create a distorted camera from its intrinsics and radial coefficients.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, k: [f32; 3]) -> Result<Self, CameraError> {
        check_focal_length(fx, fy)?;
        Ok(Self { fx, fy, cx, cy, k })
    }

    /// Create a distorted camera from `[fx, fy, cx, cy, k1, k2, k3]`.
    pub fn from_params(params: &[f32]) -> Result<Self, CameraError> {
        match *params {
            [fx, fy, cx, cy, k1, k2, k3] => Self::new(fx, fy, cx, cy, [k1, k2, k3]),
            _ => Err(CameraError::InvalidNumParams {
                expected: Self::NUM_PARAMS,
                actual: params.len(),
            }),
        }
    }

    #[inline]
    fn radial(&self, r2: f32) -> f32 {
        let [k1, k2, k3] = self.k;
        1.0 + r2 * (k1 + r2 * (k2 + r2 * k3))
    }

    /// Remove the distortion from normalized image coordinates.
    pub fn undistort(&self, xd: Vec2) -> Vec2 {
        let mut x = xd;
        for _ in 0..UNDISTORT_ITERATIONS {
            let d = self.radial(x.length_squared());
            if d.abs() < f32::EPSILON {
                break;
            }
            x = xd / d;
        }
        x
    }
}

impl CameraModel for Poly3Camera {
    const NUM_PARAMS: usize = 7;

    fn project(&self, p: Vec3) -> Option<Vec2> {
        if p.z <= 0.0 {
            return None;
        }
        let x = Vec2::new(p.x / p.z, p.y / p.z);
        let xd = x * self.radial(x.length_squared());
        Some(Vec2::new(self.fx * xd.x + self.cx, self.fy * xd.y + self.cy))
    }

    fn unproject(&self, uv: Vec2, depth: f32) -> Vec3 {
        let xd = Vec2::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy);
        let x = self.undistort(xd);
        Vec3::new(x.x * depth, x.y * depth, depth)
    }

    fn scale(&self, factor: f32) -> Self {
        Self {
            fx: self.fx * factor,
            fy: self.fy * factor,
            cx: scale_principal_point(self.cx, factor),
            cy: scale_principal_point(self.cy, factor),
            k: self.k,
        }
    }

    fn params(&self) -> Vec<f32> {
        vec![
            self.fx, self.fy, self.cx, self.cy, self.k[0], self.k[1], self.k[2],
        ]
    }
}
