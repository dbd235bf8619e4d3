use glam::Vec3;

use crate::grid::{is_valid, Grid, INVALID};

/// Estimate surface normals of an organized point cloud.
///
/// The tangents are central differences along the rows and columns of the grid,
/// falling back to one sided differences next to missing points. Normals are
/// oriented towards the sensor at the origin of the point frame.
///
/// # Arguments
///
/// * `points` - The organized point cloud in the sensor frame.
///
/// # Returns
///
/// A unit normal per point, [`INVALID`] where no tangent pair exists.
pub fn compute_normals(points: &Grid<Vec3>) -> Grid<Vec3> {
    let valid_at = |x: isize, y: isize| -> Option<Vec3> {
        if x < 0 || y < 0 {
            return None;
        }
        points
            .get(x as usize, y as usize)
            .copied()
            .filter(|p| is_valid(*p))
    };

    Grid::from_fn(points.width(), points.height(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        let Some(p) = valid_at(x, y) else {
            return INVALID;
        };

        let tangent = |prev: Option<Vec3>, next: Option<Vec3>| match (prev, next) {
            (Some(a), Some(b)) => Some(b - a),
            (None, Some(b)) => Some(b - p),
            (Some(a), None) => Some(p - a),
            (None, None) => None,
        };

        let du = tangent(valid_at(x - 1, y), valid_at(x + 1, y));
        let dv = tangent(valid_at(x, y - 1), valid_at(x, y + 1));
        let (Some(du), Some(dv)) = (du, dv) else {
            return INVALID;
        };

        let n = du.cross(dv).normalize_or_zero();
        if n == Vec3::ZERO {
            return INVALID;
        }
        if n.dot(p) > 0.0 {
            -n
        } else {
            n
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_normals() {
        // a plane z = 2 seen from the origin
        let points = Grid::from_fn(5, 4, |x, y| Vec3::new(x as f32 * 0.1, y as f32 * 0.1, 2.0));
        let normals = compute_normals(&points);
        for n in normals.as_slice() {
            assert!((*n - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5, "{n:?}");
        }
    }

    #[test]
    fn test_tilted_plane_faces_sensor() {
        let points = Grid::from_fn(4, 4, |x, y| {
            let (u, v) = (x as f32 * 0.1, y as f32 * 0.1);
            Vec3::new(u, v, 2.0 + 0.5 * u)
        });
        let normals = compute_normals(&points);
        let expected = Vec3::new(0.5, 0.0, -1.0).normalize();
        let n = normals.get(1, 1).copied().unwrap_or(INVALID);
        assert!((n - expected).length() < 1e-5, "{n:?}");
    }

    #[test]
    fn test_isolated_point_is_invalid() {
        let mut points = Grid::from_size_val(3, 3, INVALID);
        if let Some(p) = points.get_mut(1, 1) {
            *p = Vec3::new(0.0, 0.0, 1.0);
        }
        let normals = compute_normals(&points);
        assert!(normals.as_slice().iter().all(|n| !is_valid(*n)));
    }
}
