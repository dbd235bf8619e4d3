//! Linearization of a single point pair.

use glam::{Vec2, Vec3};
use kornia_3d::{camera::CameraModel, grid::is_valid};
use kornia_lie::SE3;

use crate::normal_equations::NormalEquations;
use crate::params::ResidualMetric;
use crate::surface::Surface;

/// The acceptance test applied to every candidate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate {
    /// Cosine of the maximum angle between the model normal and the transformed observed normal.
    pub cos_max_angle: f32,
    /// Maximum residual.
    pub max_distance: f32,
    /// The residual metric.
    pub metric: ResidualMetric,
}

/// The side on which the incremental twist composes with the pose estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perturbation {
    /// `T <- Exp(x) T`, the twist lives in the model frame.
    Left,
    /// `T <- T Exp(x)`, the twist lives in the observed frame.
    Right,
}

/// A candidate correspondence between a model and an observed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    /// The model point.
    pub model_point: Vec3,
    /// The model normal.
    pub model_normal: Vec3,
    /// The observed point.
    pub observed_point: Vec3,
    /// The observed normal.
    pub observed_normal: Vec3,
}

/// Evaluate the residual of `pair` at `model_from_observed`, gate it and add its
/// linearization to `acc`.
///
/// Returns whether the pair was accepted.
#[inline]
pub fn accumulate_pair(
    acc: &mut NormalEquations,
    pair: &PointPair,
    model_from_observed: &SE3,
    gate: &Gate,
    perturbation: Perturbation,
) -> bool {
    let PointPair {
        model_point: p_m,
        model_normal: n_m,
        observed_point: p_o,
        observed_normal: n_o,
    } = *pair;

    if !(is_valid(p_m) && is_valid(p_o)) {
        return false;
    }

    // NaN normals fail this comparison as well
    let n_o_in_m = model_from_observed.rotate(n_o);
    if !(n_m.dot(n_o_in_m) >= gate.cos_max_angle) {
        return false;
    }

    let p_o_in_m = model_from_observed.transform_point(p_o);

    match gate.metric {
        ResidualMetric::PointToPlane => {
            let r = n_m.dot(p_m - p_o_in_m);
            if !(r.abs() <= gate.max_distance) {
                return false;
            }
            let a = match perturbation {
                Perturbation::Left => plane_row(p_o_in_m, n_m),
                Perturbation::Right => plane_row(p_o, model_from_observed.r.inverse().rotate(n_m)),
            };
            acc.add_row(&a, r);
            acc.add_pair(r * r);
        }
        ResidualMetric::PointToPoint => {
            let e = p_m - p_o_in_m;
            let e_sq = e.length_squared();
            if !(e_sq <= gate.max_distance * gate.max_distance) {
                return false;
            }
            let (p, b) = match perturbation {
                Perturbation::Left => (p_o_in_m, e),
                Perturbation::Right => (p_o, model_from_observed.r.inverse().rotate(e)),
            };
            for (a, b) in point_rows(p).iter().zip(b.to_array()) {
                acc.add_row(a, b);
            }
            acc.add_pair(e_sq);
        }
    }

    true
}

// d/dx of n . (p + w x p + v)
#[inline]
fn plane_row(p: Vec3, n: Vec3) -> [f32; 6] {
    let c = p.cross(n);
    [c.x, c.y, c.z, n.x, n.y, n.z]
}

// d/dx of p + w x p + v, one row per coordinate
#[inline]
fn point_rows(p: Vec3) -> [[f32; 6]; 3] {
    [
        [0.0, p.z, -p.y, 1.0, 0.0, 0.0],
        [-p.z, 0.0, p.x, 0.0, 1.0, 0.0],
        [p.y, -p.x, 0.0, 0.0, 0.0, 1.0],
    ]
}

/// Find the model pixel an observed point projects to.
///
/// The observed point is moved into the model frame with `model_from_observed`,
/// then into the camera frame with `camera_from_model` and projected to the
/// nearest pixel of `model`.
#[inline]
pub fn project_to_model<C: CameraModel>(
    model: &Surface<'_>,
    camera: &C,
    camera_from_model: &SE3,
    model_from_observed: &SE3,
    observed_point: Vec3,
) -> Option<(usize, usize)> {
    let p_c = camera_from_model.transform_point(model_from_observed.transform_point(observed_point));
    let uv: Vec2 = camera.project(p_c)?.round();
    if uv.x < 0.0 || uv.y < 0.0 {
        return None;
    }
    let (x, y) = (uv.x as usize, uv.y as usize);
    (x < model.width() && y < model.height()).then_some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kornia_3d::grid::INVALID;

    fn gate(metric: ResidualMetric) -> Gate {
        Gate {
            cos_max_angle: 20f32.to_radians().cos(),
            max_distance: 0.1,
            metric,
        }
    }

    fn pair(offset: f32) -> PointPair {
        PointPair {
            model_point: Vec3::new(0.1, 0.2, 1.0),
            model_normal: Vec3::new(0.0, 0.0, -1.0),
            observed_point: Vec3::new(0.1, 0.2, 1.0 + offset),
            observed_normal: Vec3::new(0.0, 0.0, -1.0),
        }
    }

    #[test]
    fn test_distance_gate() {
        let g = gate(ResidualMetric::PointToPlane);
        let mut acc = NormalEquations::default();
        assert!(accumulate_pair(&mut acc, &pair(0.05), &SE3::IDENTITY, &g, Perturbation::Left));
        assert!(!accumulate_pair(&mut acc, &pair(0.2), &SE3::IDENTITY, &g, Perturbation::Left));
        assert_eq!(acc.count, 1);
        assert!((acc.error - 0.05 * 0.05).abs() < 1e-7);

        let g = gate(ResidualMetric::PointToPoint);
        let mut acc = NormalEquations::default();
        assert!(accumulate_pair(&mut acc, &pair(0.05), &SE3::IDENTITY, &g, Perturbation::Left));
        assert!(!accumulate_pair(&mut acc, &pair(-0.2), &SE3::IDENTITY, &g, Perturbation::Left));
        assert_eq!(acc.count, 1);
    }

    #[test]
    fn test_angle_gate() {
        let g = gate(ResidualMetric::PointToPlane);
        let mut acc = NormalEquations::default();

        let mut tilted = pair(0.0);
        tilted.observed_normal = Vec3::new(0.0, 30f32.to_radians().sin(), -30f32.to_radians().cos());
        assert!(!accumulate_pair(&mut acc, &tilted, &SE3::IDENTITY, &g, Perturbation::Left));

        // rotating the observed frame back brings the normals into agreement
        let undo = SE3::new(
            kornia_lie::SO3::exp(Vec3::new(-30f32.to_radians(), 0.0, 0.0)),
            Vec3::ZERO,
        );
        let loose = Gate {
            max_distance: 1.0,
            ..g
        };
        assert!(accumulate_pair(&mut acc, &tilted, &undo, &loose, Perturbation::Left));
        assert_eq!(acc.count, 1);

        let mut flipped = pair(0.0);
        flipped.observed_normal = Vec3::new(0.0, 0.0, 1.0);
        assert!(!accumulate_pair(&mut acc, &flipped, &SE3::IDENTITY, &g, Perturbation::Left));
        assert_eq!(acc.count, 1);
    }

    #[test]
    fn test_invalid_points_rejected() {
        let g = gate(ResidualMetric::PointToPlane);
        let mut acc = NormalEquations::default();
        let mut p = pair(0.0);
        p.model_point = INVALID;
        assert!(!accumulate_pair(&mut acc, &p, &SE3::IDENTITY, &g, Perturbation::Right));
        let mut p = pair(0.0);
        p.observed_normal = INVALID;
        assert!(!accumulate_pair(&mut acc, &p, &SE3::IDENTITY, &g, Perturbation::Right));
        assert_eq!(acc, NormalEquations::default());
    }

    #[test]
    fn test_rows_match_finite_differences() {
        let pose = SE3::exp(&[0.05, -0.1, 0.02, 0.01, 0.02, -0.03]);
        let p = PointPair {
            model_point: Vec3::new(0.3, -0.2, 1.4),
            model_normal: Vec3::new(0.2, 0.1, -1.0).normalize(),
            observed_point: Vec3::new(0.25, -0.15, 1.0),
            observed_normal: Vec3::new(0.15, 0.1, -1.0).normalize(),
        };
        let g = Gate {
            cos_max_angle: -1.0,
            max_distance: 1.0,
            metric: ResidualMetric::PointToPlane,
        };
        let residual = |t: &SE3| p.model_normal.dot(p.model_point - t.transform_point(p.observed_point));

        for perturbation in [Perturbation::Left, Perturbation::Right] {
            let mut acc = NormalEquations::default();
            assert!(accumulate_pair(&mut acc, &p, &pose, &g, perturbation));
            let r0 = residual(&pose);
            // with a single pair A^T b = a r, so a = A^T b / r
            let a: Vec<f32> = acc.atb.iter().map(|v| v / r0).collect();

            let h = 1e-3;
            for k in 0..6 {
                let mut xi = [0.0f32; 6];
                xi[k] = h;
                let perturbed = match perturbation {
                    Perturbation::Left => SE3::exp(&xi) * pose,
                    Perturbation::Right => pose * SE3::exp(&xi),
                };
                // r(x) = r0 - a . x
                let numeric = (r0 - residual(&perturbed)) / h;
                assert!((numeric - a[k]).abs() < 1e-2, "{perturbation:?} {k}: {numeric} vs {}", a[k]);
            }
        }
    }
}
