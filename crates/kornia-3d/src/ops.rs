use glam::{Vec2, Vec3};
use kornia_lie::SE3;

use crate::camera::CameraModel;
use crate::grid::{is_valid, Grid, GridError, INVALID};
use crate::pyramid::Pyramid;

/// Back-project a depth image into an organized point cloud.
///
/// # Arguments
///
/// * `depth` - The depth along the optical axis of every pixel. Zero, negative
///   and non finite values mark missing measurements.
/// * `camera` - The camera model matching the resolution of `depth`.
///
/// # Returns
///
/// A grid of points in the camera frame, with [`INVALID`] where the depth is missing.
///
/// Example:
/// ```
/// use kornia_3d::camera::PinholeCamera;
/// use kornia_3d::grid::Grid;
/// use kornia_3d::ops::depth_to_points;
///
/// let camera = PinholeCamera::new(1.0, 1.0, 0.0, 0.0).unwrap();
/// let depth = Grid::from_size_val(2, 2, 2.0f32);
/// let points = depth_to_points(&depth, &camera);
/// assert_eq!(points.get(1, 1).unwrap().z, 2.0);
/// ```
pub fn depth_to_points<C: CameraModel>(depth: &Grid<f32>, camera: &C) -> Grid<Vec3> {
    Grid::from_fn(depth.width(), depth.height(), |x, y| match depth.get(x, y) {
        Some(&d) if d.is_finite() && d > 0.0 => {
            camera.unproject(Vec2::new(x as f32, y as f32), d)
        }
        _ => INVALID,
    })
}

/// Back-project every level of a depth pyramid with the camera scaled to that level.
///
/// # Arguments
///
/// * `depth` - The depth pyramid, level 0 at the resolution of `camera`.
/// * `camera` - The full resolution camera model.
pub fn depth_pyramid_to_points<C: CameraModel>(
    depth: &Pyramid<f32>,
    camera: &C,
) -> Result<Pyramid<Vec3>, GridError> {
    let levels = depth
        .iter()
        .enumerate()
        .map(|(level, d)| depth_to_points(d, &camera.scale(Pyramid::<f32>::scale(level))))
        .collect();
    Pyramid::new(levels)
}

/// Apply a rigid transform to every valid point of a grid.
///
/// # Arguments
///
/// * `src` - The points to transform.
/// * `dst_from_src` - The transform to apply.
/// * `dst` - The output grid with the same shape as `src`. Invalid points are copied as is.
pub fn transform_points(
    src: &Grid<Vec3>,
    dst_from_src: &SE3,
    dst: &mut Grid<Vec3>,
) -> Result<(), GridError> {
    src.check_same_shape(dst)?;
    for (p_dst, &p_src) in dst.as_slice_mut().iter_mut().zip(src.as_slice()) {
        *p_dst = if is_valid(p_src) {
            dst_from_src.transform_point(p_src)
        } else {
            INVALID
        };
    }
    Ok(())
}

/// Rotate every valid normal of a grid. The translation of `dst_from_src` is ignored.
pub fn transform_normals(
    src: &Grid<Vec3>,
    dst_from_src: &SE3,
    dst: &mut Grid<Vec3>,
) -> Result<(), GridError> {
    src.check_same_shape(dst)?;
    for (n_dst, &n_src) in dst.as_slice_mut().iter_mut().zip(src.as_slice()) {
        *n_dst = if is_valid(n_src) {
            dst_from_src.rotate(n_src)
        } else {
            INVALID
        };
    }
    Ok(())
}
