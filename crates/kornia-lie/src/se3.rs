use glam::{Mat3, Mat4, Vec3};
use std::ops::Mul;

use crate::so3::SO3;

/// A rigid body transformation in 3D.
///
/// The transform maps a point `p` to `r * p + t`. Naming follows the
/// `dst_from_src` convention used across the workspace, e.g. `T_mo` maps
/// points expressed in the observed frame into the model frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SE3 {
    /// The rotation part.
    pub r: SO3,
    /// The translation part.
    pub t: Vec3,
}

impl SE3 {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        r: SO3::IDENTITY,
        t: Vec3::ZERO,
    };

    /// Create a transformation from a rotation and a translation.
    pub fn new(r: SO3, t: Vec3) -> Self {
        Self { r, t }
    }

    /// Create a transformation from a rotation matrix and a translation.
    pub fn from_rt(rotation: &Mat3, translation: Vec3) -> Self {
        Self {
            r: SO3::from_matrix(rotation),
            t: translation,
        }
    }

    /// Create a pure translation.
    pub fn from_translation(t: Vec3) -> Self {
        Self { r: SO3::IDENTITY, t }
    }

    /// The rotation as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Mat3 {
        self.r.matrix()
    }

    /// The homogeneous 4x4 matrix.
    pub fn matrix(&self) -> Mat4 {
        let mut m = Mat4::from_mat3(self.r.matrix());
        m.w_axis = self.t.extend(1.0);
        m
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> Self {
        let r_inv = self.r.inverse();
        Self {
            r: r_inv,
            t: -(r_inv * self.t),
        }
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.r.rotate(p) + self.t
    }

    /// Apply the rotation part only, e.g. to a surface normal.
    #[inline]
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        self.r.rotate(v)
    }

    /// Lie algebra -> Lie group
    ///
    /// The tangent vector is ordered rotation first: `[wx, wy, wz, vx, vy, vz]`.
    pub fn exp(xi: &[f32; 6]) -> Self {
        let omega = Vec3::new(xi[0], xi[1], xi[2]);
        let upsilon = Vec3::new(xi[3], xi[4], xi[5]);
        Self {
            r: SO3::exp(omega),
            t: SO3::left_jacobian(omega) * upsilon,
        }
    }

    /// Lie group -> Lie algebra, rotation first.
    pub fn log(&self) -> [f32; 6] {
        let omega = self.r.log();
        let upsilon = SO3::left_jacobian_inverse(omega) * self.t;
        [omega.x, omega.y, omega.z, upsilon.x, upsilon.y, upsilon.z]
    }

    /// The rotation angle in radians.
    pub fn angle(&self) -> f32 {
        self.r.log().length()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            r: self.r * rhs.r,
            t: self.t + self.r.rotate(rhs.t),
        }
    }
}

impl Mul<Vec3> for SE3 {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Self::Output {
        self.transform_point(rhs)
    }
}
