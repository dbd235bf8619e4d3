//! Synthetic scenes shared by the unit tests.

use glam::{Vec2, Vec3};
use kornia_3d::{
    camera::{CameraModel, PinholeCamera},
    grid::{Grid, INVALID},
    pyramid::Pyramid,
    rig::Rig,
};
use kornia_lie::SE3;

pub(crate) const WIDTH: usize = 64;
pub(crate) const HEIGHT: usize = 48;

pub(crate) fn camera() -> PinholeCamera {
    PinholeCamera {
        fx: 60.0,
        fy: 60.0,
        cx: 31.5,
        cy: 23.5,
    }
}

// z = h(x, y) in the world frame
pub(crate) fn height(x: f32, y: f32) -> f32 {
    2.0 + 0.15 * (3.0 * x).sin() * (2.0 * y).cos() + 0.1 * x
}

fn gradient(x: f32, y: f32) -> (f32, f32) {
    (
        0.45 * (3.0 * x).cos() * (2.0 * y).cos() + 0.1,
        -0.3 * (3.0 * x).sin() * (2.0 * y).sin(),
    )
}

pub(crate) fn surface_normal(x: f32, y: f32) -> Vec3 {
    let (hx, hy) = gradient(x, y);
    Vec3::new(-hx, -hy, 1.0).normalize()
}

/// Ray cast the height field from a camera; points and normals in the camera frame.
pub(crate) fn render<C: CameraModel>(
    camera: &C,
    width: usize,
    height_px: usize,
    world_from_camera: &SE3,
) -> (Grid<Vec3>, Grid<Vec3>) {
    let camera_from_world = world_from_camera.inverse();
    let mut normals = Grid::from_size_val(width, height_px, INVALID);

    let points = Grid::from_fn(width, height_px, |u, v| {
        let ray = camera.unproject(Vec2::new(u as f32, v as f32), 1.0);
        let origin = world_from_camera.t;
        let dir = world_from_camera.rotate(ray);

        let mut t = (2.0 - origin.z) / dir.z;
        for _ in 0..30 {
            let q = origin + t * dir;
            let (hx, hy) = gradient(q.x, q.y);
            let g = q.z - height(q.x, q.y);
            let dg = dir.z - hx * dir.x - hy * dir.y;
            t -= g / dg;
        }
        let q = origin + t * dir;
        if !(t > 0.0) || (q.z - height(q.x, q.y)).abs() > 1e-4 {
            return INVALID;
        }

        let p = ray * t;
        let mut n = camera_from_world.rotate(surface_normal(q.x, q.y));
        if n.dot(p) > 0.0 {
            n = -n;
        }
        if let Some(cell) = normals.get_mut(u, v) {
            *cell = n;
        }
        p
    });

    (points, normals)
}

pub(crate) fn pyramids(
    (points, normals): (Grid<Vec3>, Grid<Vec3>),
    num_levels: usize,
) -> (Pyramid<Vec3>, Pyramid<Vec3>) {
    (
        Pyramid::from_points(points, num_levels),
        Pyramid::from_normals(normals, num_levels),
    )
}

/// Render every stream of a rig into a vertically stacked image in the rig frame.
pub(crate) fn render_rig<C: CameraModel>(rig: &Rig<C>, world_from_rig: &SE3) -> (Grid<Vec3>, Grid<Vec3>) {
    let (width, height_px) = rig.stream_size();
    let mut points = Grid::from_size_val(width, height_px * rig.num_cameras(), INVALID);
    let mut normals = points.clone();

    for (c, (camera, rig_from_camera)) in rig
        .cameras()
        .iter()
        .zip(rig.rig_from_cameras())
        .enumerate()
    {
        let (p, n) = render(camera, width, height_px, &(*world_from_rig * *rig_from_camera));
        for v in 0..height_px {
            for u in 0..width {
                let (Some(&p), Some(&n)) = (p.get(u, v), n.get(u, v)) else {
                    continue;
                };
                if let Some(cell) = points.get_mut(u, c * height_px + v) {
                    *cell = rig_from_camera.transform_point(p);
                }
                if let Some(cell) = normals.get_mut(u, c * height_px + v) {
                    *cell = rig_from_camera.rotate(n);
                }
            }
        }
    }

    (points, normals)
}

pub(crate) fn rotation_error_deg(a: &SE3, b: &SE3) -> f32 {
    (a.inverse() * *b).angle().to_degrees()
}

pub(crate) fn translation_error(a: &SE3, b: &SE3) -> f32 {
    (a.t - b.t).length()
}
