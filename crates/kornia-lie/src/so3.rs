use glam::{Mat3, Quat, Vec3};
use rand::Rng;
use std::ops::Mul;

const SMALL_ANGLE_EPSILON: f32 = 1.0e-6;

/// A 3D rotation, stored as a unit quaternion.
///
/// `q` and `-q` represent the same rotation. [`SO3::log`] always returns the
/// shortest rotation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// The unit quaternion representing the rotation.
    pub q: Quat,
}

impl Default for SO3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { q: Quat::IDENTITY };

    /// Create a rotation from a quaternion. The quaternion is normalized.
    pub fn from_quaternion(quat: &Quat) -> Self {
        Self {
            q: quat.normalize(),
        }
    }

    /// Create a rotation from a 3x3 rotation matrix.
    pub fn from_matrix(mat: &Mat3) -> Self {
        Self {
            q: Quat::from_mat3(mat).normalize(),
        }
    }

    /// Create a rotation from a unit axis and an angle in radians.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        Self::exp(axis.normalize_or_zero() * angle)
    }

    /// Draw a uniformly distributed random rotation.
    pub fn from_random() -> Self {
        let mut rng = rand::rng();

        let r1: f32 = rng.random();
        let r2: f32 = rng.random();
        let r3: f32 = rng.random();

        let w = (1.0 - r1).sqrt() * (2.0 * std::f32::consts::PI * r2).sin();
        let x = (1.0 - r1).sqrt() * (2.0 * std::f32::consts::PI * r2).cos();
        let y = r1.sqrt() * (2.0 * std::f32::consts::PI * r3).sin();
        let z = r1.sqrt() * (2.0 * std::f32::consts::PI * r3).cos();

        Self {
            q: Quat::from_xyzw(x, y, z, w),
        }
    }

    /// The rotation as a 3x3 matrix.
    pub fn matrix(&self) -> Mat3 {
        Mat3::from_quat(self.q)
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Rotate a vector.
    #[inline]
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        self.q * v
    }

    /// Lie algebra -> Lie group
    pub fn exp(v: Vec3) -> Self {
        let theta = v.length();
        let theta_half = 0.5 * theta;

        let (w, b) = if theta > SMALL_ANGLE_EPSILON {
            (theta_half.cos(), theta_half.sin() / theta)
        } else {
            // second order expansion of cos(theta/2) and sin(theta/2)/theta
            let theta_sq = theta * theta;
            (1.0 - theta_sq / 8.0, 0.5 - theta_sq / 48.0)
        };
        let xyz = b * v;

        Self {
            q: Quat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize(),
        }
    }

    /// Lie group -> Lie algebra
    pub fn log(&self) -> Vec3 {
        // pick the hemisphere with w >= 0 so the angle lies in [0, pi]
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = Vec3::new(q.x, q.y, q.z);
        let n = vec.length();

        if n < SMALL_ANGLE_EPSILON {
            return vec * (2.0 / q.w);
        }

        vec * (2.0 * n.atan2(q.w) / n)
    }

    /// Vector space -> Lie algebra
    pub fn hat(v: Vec3) -> Mat3 {
        Mat3::from_cols(
            Vec3::new(0.0, v.z, -v.y),
            Vec3::new(-v.z, 0.0, v.x),
            Vec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Lie algebra -> vector space
    pub fn vee(omega: Mat3) -> Vec3 {
        Vec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }

    /// Left jacobian of the exponential map.
    pub fn left_jacobian(v: Vec3) -> Mat3 {
        let skew = Self::hat(v);
        let theta = v.length();

        if theta < SMALL_ANGLE_EPSILON {
            return Mat3::IDENTITY + 0.5 * skew + (skew * skew) * (1.0 / 6.0);
        }

        let theta_sq = theta * theta;
        Mat3::IDENTITY
            + ((1.0 - theta.cos()) / theta_sq) * skew
            + ((theta - theta.sin()) / (theta_sq * theta)) * (skew * skew)
    }

    /// Inverse of the left jacobian of the exponential map.
    pub fn left_jacobian_inverse(v: Vec3) -> Mat3 {
        let skew = Self::hat(v);
        let theta = v.length();

        if theta < SMALL_ANGLE_EPSILON {
            return Mat3::IDENTITY - 0.5 * skew + (skew * skew) * (1.0 / 12.0);
        }

        let theta_sq = theta * theta;
        let half = 0.5 * theta;
        let coeff = (1.0 - half * half.cos() / half.sin()) / theta_sq;
        Mat3::IDENTITY - 0.5 * skew + coeff * (skew * skew)
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            q: (self.q * rhs.q).normalize(),
        }
    }
}

impl Mul<Vec3> for SO3 {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Self::Output {
        self.rotate(rhs)
    }
}
