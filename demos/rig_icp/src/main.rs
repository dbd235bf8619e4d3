use argh::FromArgs;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use kornia::icp::{self as kicp, CpuBackend, ExecutionStrategy, SurfacePyramid};
use kornia::k3d::{
    camera::{CameraModel, PinholeCamera},
    grid::{Grid, INVALID},
    normals::compute_normals,
    ops,
    pyramid::Pyramid,
    rig::Rig,
};
use kornia::lie::{SE3, SO3};

#[derive(FromArgs)]
/// Register two synthetic frames of a two camera rig with projective ICP
struct Args {
    /// path to a JSON file with `params` and `criteria`
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of worker threads, all cores when omitted
    #[argh(option)]
    num_threads: Option<usize>,

    /// also refine the extrinsics of every stream
    #[argh(switch)]
    per_stream: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    params: kicp::IcpParams,
    criteria: kicp::ProjectiveCriteria,
}

const WIDTH: usize = 160;
const HEIGHT: usize = 120;

// depth of a rippled wall two meters in front of the world origin
fn wall_depth(camera: &PinholeCamera, world_from_camera: &SE3) -> Grid<f32> {
    Grid::from_fn(WIDTH, HEIGHT, |u, v| {
        // unit depth, so the ray parameter is the depth along the optical axis
        let ray = world_from_camera.rotate(camera.unproject(Vec2::new(u as f32, v as f32), 1.0));
        let origin = world_from_camera.t;
        let mut t = (2.0 - origin.z) / ray.z;
        for _ in 0..20 {
            let q = origin + t * ray;
            let z = 2.0 + 0.1 * (4.0 * q.x).sin() * (3.0 * q.y).cos() + 0.1 * q.x;
            let dz_dt = ray.z
                - 0.4 * (4.0 * q.x).cos() * (3.0 * q.y).cos() * ray.x
                + 0.3 * (4.0 * q.x).sin() * (3.0 * q.y).sin() * ray.y
                - 0.1 * ray.x;
            t -= (q.z - z) / dz_dt;
        }
        if t.is_finite() && t > 0.0 {
            t
        } else {
            f32::NAN
        }
    })
}

// render every stream into a vertically stacked rig frame image
fn render(
    rig: &Rig<PinholeCamera>,
    rig_from_world: &SE3,
) -> Result<(Grid<Vec3>, Grid<Vec3>), Box<dyn std::error::Error>> {
    let mut points = Vec::with_capacity(WIDTH * HEIGHT * rig.num_cameras());
    let mut normals = Vec::with_capacity(points.capacity());

    for (camera, rig_from_camera) in rig.cameras().iter().zip(rig.rig_from_cameras()) {
        let world_from_camera = rig_from_world.inverse() * *rig_from_camera;
        let depth = wall_depth(camera, &world_from_camera);
        let camera_points = ops::depth_to_points(&depth, camera);
        let camera_normals = compute_normals(&camera_points);

        let mut rig_points = Grid::from_size_val(WIDTH, HEIGHT, INVALID);
        let mut rig_normals = rig_points.clone();
        ops::transform_points(&camera_points, rig_from_camera, &mut rig_points)?;
        ops::transform_normals(&camera_normals, rig_from_camera, &mut rig_normals)?;

        points.extend_from_slice(rig_points.as_slice());
        normals.extend_from_slice(rig_normals.as_slice());
    }

    let height = HEIGHT * rig.num_cameras();
    Ok((Grid::new(WIDTH, height, points)?, Grid::new(WIDTH, height, normals)?))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config: Config = match &args.config {
        Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => Config::default(),
    };
    log::info!("config: {}", serde_json::to_string(&config)?);

    let camera = PinholeCamera::new(120.0, 120.0, 79.5, 59.5)?;
    let right = SE3::new(
        SO3::from_axis_angle(Vec3::Y, 15f32.to_radians()),
        Vec3::new(0.25, 0.0, 0.0),
    );
    let mut rig = Rig::new(
        vec![camera, camera],
        vec![SE3::IDENTITY, right],
        vec![0, 1],
        WIDTH,
        HEIGHT,
    )?;

    let num_levels = config.criteria.max_iterations.len();
    let truth = SE3::exp(&[0.01, -0.02, 0.015, 0.03, -0.02, 0.04]);

    let (model_points, model_normals) = render(&rig, &SE3::IDENTITY)?;
    let (observed_points, observed_normals) = render(&rig, &truth.inverse())?;

    let model_points = Pyramid::from_points(model_points, num_levels);
    let model_normals = Pyramid::from_normals(model_normals, num_levels);
    let observed_points = Pyramid::from_points(observed_points, num_levels);
    let observed_normals = Pyramid::from_normals(observed_normals, num_levels);

    let model = SurfacePyramid::new(&model_points, &model_normals)?;
    let observed = SurfacePyramid::new(&observed_points, &observed_normals)?;

    let strategy = match args.num_threads {
        Some(n) => ExecutionStrategy::Fixed(n),
        None => ExecutionStrategy::Parallel,
    };
    let backend = CpuBackend::new(strategy);

    let mut model_from_rig = SE3::IDENTITY;
    let summary = kicp::icp_projective_rig(
        &backend,
        &model,
        &observed,
        &rig,
        &mut model_from_rig,
        &config.params,
        &config.criteria,
    )?;

    for level in summary.levels.iter().rev() {
        println!(
            "level {}: err={:.6} inliers={} iterations={} ({:?})",
            level.level, level.error, level.count, level.iterations, level.termination
        );
    }
    let residual = truth.inverse() * model_from_rig;
    println!("estimated twist: {:?}", model_from_rig.log());
    println!("ground truth:    {:?}", truth.log());
    println!(
        "residual: {:.4} deg, {:.5} m",
        residual.angle().to_degrees(),
        residual.t.length()
    );

    if args.per_stream {
        let before = rig.rig_from_cameras().to_vec();
        kicp::icp_projective_rig_per_stream(
            &backend,
            &model,
            &observed,
            &mut rig,
            &SE3::IDENTITY,
            &config.params,
            &config.criteria,
        )?;
        for (s, (after, before)) in rig.rig_from_cameras().iter().zip(before).enumerate() {
            let correction = *after * before.inverse();
            println!("stream {} correction: {:?}", s, correction.log());
        }
    }

    Ok(())
}
