use glam::Vec3;
use kornia_3d::{camera::CameraModel, pyramid::Pyramid, rig::Rig};
use kornia_lie::SE3;

use crate::backend::{AccumulationBackend, ProjectiveProblem};
use crate::error::IcpError;
use crate::normal_equations::NormalEquations;
use crate::params::{IcpParams, ProjectiveCriteria};
use crate::solver::{diverged, relative_change, Termination};
use crate::surface::SurfacePyramid;

/// The outcome of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSummary {
    /// The pyramid level, 0 is the finest.
    pub level: usize,
    /// The sum of squared residuals of the last accumulation.
    pub error: f32,
    /// The natural logarithm of `error`.
    pub log_error: f32,
    /// The number of accepted pairs of the last accumulation.
    pub count: usize,
    /// The number of pose updates applied.
    pub iterations: usize,
    /// Why the level stopped.
    pub termination: Termination,
}

impl LevelSummary {
    fn new(level: usize, termination: Termination) -> Self {
        Self {
            level,
            error: 0.0,
            log_error: f32::NEG_INFINITY,
            count: 0,
            iterations: 0,
            termination,
        }
    }
}

/// The outcome of a coarse-to-fine projective registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectiveSummary {
    /// One entry per level, indexed by level.
    pub levels: Vec<LevelSummary>,
    /// The inverse of the unnormalized `A^T A` of the last solve.
    pub covariance: Option<[[f32; 6]; 6]>,
}

impl ProjectiveSummary {
    fn new(num_levels: usize) -> Self {
        Self {
            // levels the loop never reaches were cut short by a cancellation
            levels: (0..num_levels)
                .map(|level| LevelSummary::new(level, Termination::Cancelled))
                .collect(),
            covariance: None,
        }
    }

    /// Whether any level was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.levels
            .iter()
            .any(|l| l.termination == Termination::Cancelled)
    }
}

fn check_levels(
    model: &SurfacePyramid<'_>,
    observed: &SurfacePyramid<'_>,
    criteria: &ProjectiveCriteria,
) -> Result<usize, IcpError> {
    let num_levels = criteria.max_iterations.len();
    if num_levels == 0 {
        return Err(IcpError::NoLevels);
    }
    for pyramid in [model, observed] {
        if pyramid.num_levels() < num_levels {
            return Err(IcpError::LevelMismatch(pyramid.num_levels(), num_levels));
        }
    }
    Ok(num_levels)
}

// Gauss-Newton on one level with `T <- T Exp(x)` updates.
fn optimize_level<B: AccumulationBackend>(
    backend: &B,
    level: usize,
    criteria: &ProjectiveCriteria,
    pose: &mut SE3,
    mut accumulate: impl FnMut(&SE3) -> Result<NormalEquations, IcpError>,
) -> Result<(LevelSummary, Option<NormalEquations>), IcpError> {
    let max_iterations = criteria.max_iterations.get(level).copied().unwrap_or(0);

    let mut summary = LevelSummary::new(level, Termination::MaxIterations);
    let mut last_solved = None;
    let mut prev_error = 0.0;
    let mut prev_pose = *pose;

    for it in 0..max_iterations {
        if backend.is_cancelled() {
            summary.termination = Termination::Cancelled;
            break;
        }

        let ne = accumulate(pose)?;
        summary.error = ne.error;
        summary.count = ne.count;

        if ne.count == 0 || ne.count < criteria.min_inliers {
            log::warn!(
                "inliers {} in pyramid level {} too small, skipping",
                ne.count,
                level
            );
            summary.termination = Termination::InsufficientInliers;
            break;
        }

        if it > 0 && diverged(ne.error, prev_error, criteria.max_relative_increase) {
            log::warn!(
                "level {}: error increased from {} to {}, restoring the previous pose",
                level,
                prev_error,
                ne.error
            );
            *pose = prev_pose;
            summary.iterations = summary.iterations.saturating_sub(1);
            summary.termination = Termination::Diverged;
            break;
        }

        let Some(x) = ne.solve() else {
            log::warn!("singular normal equations in pyramid level {}", level);
            summary.termination = Termination::SingularSystem;
            break;
        };

        prev_pose = *pose;
        *pose = *pose * SE3::exp(&x);
        summary.iterations += 1;
        last_solved = Some(ne);

        let change = relative_change(ne.error, prev_error);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "lvl {} it {}: err={} dErr/err={} inliers={} kappa={} |w|={}deg |v|={}",
                level,
                it,
                ne.error,
                change,
                ne.count,
                ne.condition_number(),
                Vec3::new(x[0], x[1], x[2]).length().to_degrees(),
                Vec3::new(x[3], x[4], x[5]).length()
            );
        }

        if it > 0 && change < criteria.relative_tolerance {
            summary.termination = Termination::Converged;
            break;
        }
        prev_error = ne.error;
    }

    summary.log_error = summary.error.ln();
    Ok((summary, last_solved))
}

/// Coarse-to-fine projective point-to-plane ICP for a single camera.
///
/// Observed points are moved into the model frame, projected through
/// `camera_from_model` and paired with the model point at the nearest pixel.
/// Levels run from `criteria.max_iterations.len() - 1` down to 0, with the
/// camera scaled by `2^-level`, and the pose is updated as `T_mo <- T_mo Exp(x)`.
///
/// # Arguments
///
/// * `backend` - The accumulation backend.
/// * `model` - The model point and normal pyramids, rendered by `camera`.
/// * `observed` - The observed point and normal pyramids.
/// * `camera` - The full resolution camera of the model.
/// * `camera_from_model` - The transform from the model frame to the camera frame.
/// * `model_from_observed` - The pose `T_mo`, updated in place.
/// * `params` - Correspondence gating.
/// * `criteria` - Per level stopping rules.
#[allow(clippy::too_many_arguments)]
pub fn icp_projective<B: AccumulationBackend, C: CameraModel>(
    backend: &B,
    model: &SurfacePyramid<'_>,
    observed: &SurfacePyramid<'_>,
    camera: &C,
    camera_from_model: &SE3,
    model_from_observed: &mut SE3,
    params: &IcpParams,
    criteria: &ProjectiveCriteria,
) -> Result<ProjectiveSummary, IcpError> {
    let num_levels = check_levels(model, observed, criteria)?;
    let gate = params.gate();
    let mut summary = ProjectiveSummary::new(num_levels);

    for level in (0..num_levels).rev() {
        let camera = camera.scale(Pyramid::<Vec3>::scale(level));
        let problem = ProjectiveProblem {
            model: model.level(level)?,
            observed: observed.level(level)?,
            camera: &camera,
            camera_from_model: *camera_from_model,
        };

        let (level_summary, last_solved) =
            optimize_level(backend, level, criteria, model_from_observed, |pose| {
                backend.accumulate_projective(&problem, pose, &gate)
            })?;

        log::info!(
            "level {}: err={} inliers={} iterations={} ({:?})",
            level,
            level_summary.error,
            level_summary.count,
            level_summary.iterations,
            level_summary.termination
        );

        summary.levels[level] = level_summary;
        if let Some(ne) = last_solved {
            summary.covariance = ne.covariance();
        }
        if level_summary.termination == Termination::Cancelled {
            break;
        }
    }

    Ok(summary)
}

// the camera model of every stream scaled to `level`
fn scaled_stream_cameras<C: CameraModel>(rig: &Rig<C>, level: usize) -> Result<Vec<C>, IcpError> {
    let scale = Pyramid::<Vec3>::scale(level);
    (0..rig.num_streams())
        .map(|s| -> Result<C, IcpError> { Ok(rig.stream_camera(s)?.scale(scale)) })
        .collect()
}

fn stream_problems<'a, C: CameraModel>(
    rig: &Rig<C>,
    model: &SurfacePyramid<'a>,
    observed: &SurfacePyramid<'a>,
    cameras: &'a [C],
    level: usize,
) -> Result<Vec<ProjectiveProblem<'a, C>>, IcpError> {
    cameras
        .iter()
        .enumerate()
        .map(|(s, camera)| -> Result<ProjectiveProblem<'a, C>, IcpError> {
            Ok(ProjectiveProblem {
                model: model.stream(rig, s, level)?,
                observed: observed.stream(rig, s, level)?,
                camera,
                camera_from_model: rig.stream_rig_from_camera(s)?.inverse(),
            })
        })
        .collect()
}

/// Coarse-to-fine projective ICP of a camera rig with one joint pose.
///
/// The point and normal images of all streams are stacked vertically and
/// expressed in the rig frame. Every iteration sums the normal equations of all
/// streams, each projected through its own camera and `T_cr = T_rc^-1`, and
/// applies one update `T_mr <- T_mr Exp(x)`.
///
/// # Returns
///
/// Per level statistics and the covariance `(A^T A)^-1` of the last solve.
pub fn icp_projective_rig<B: AccumulationBackend, C: CameraModel>(
    backend: &B,
    model: &SurfacePyramid<'_>,
    observed: &SurfacePyramid<'_>,
    rig: &Rig<C>,
    model_from_rig: &mut SE3,
    params: &IcpParams,
    criteria: &ProjectiveCriteria,
) -> Result<ProjectiveSummary, IcpError> {
    let num_levels = check_levels(model, observed, criteria)?;
    let gate = params.gate();
    let mut summary = ProjectiveSummary::new(num_levels);

    for level in (0..num_levels).rev() {
        let cameras = scaled_stream_cameras(rig, level)?;
        let problems = stream_problems(rig, model, observed, &cameras, level)?;

        let (level_summary, last_solved) =
            optimize_level(backend, level, criteria, model_from_rig, |pose| {
                problems
                    .iter()
                    .map(|problem| backend.accumulate_projective(problem, pose, &gate))
                    .sum()
            })?;

        log::info!(
            "level {}: err={} log_err={} inliers={} iterations={} ({:?})",
            level,
            level_summary.error,
            level_summary.log_error,
            level_summary.count,
            level_summary.iterations,
            level_summary.termination
        );

        summary.levels[level] = level_summary;
        if let Some(ne) = last_solved {
            summary.covariance = ne.covariance();
        }
        if level_summary.termination == Termination::Cancelled {
            break;
        }
    }

    Ok(summary)
}

/// Coarse-to-fine projective ICP that refines the extrinsics of every stream.
///
/// Each stream keeps its own correction `dT_s`, starting at identity, and is
/// registered with the pose `T_mr dT_s`. A stream with fewer than
/// `criteria.min_inliers` pairs skips its update. The summed error and pair
/// count of all streams drive convergence and abandonment. After the last
/// level the extrinsics are replaced by `T_rc <- dT_s T_rc`; `model_from_rig`
/// itself is left untouched.
pub fn icp_projective_rig_per_stream<B: AccumulationBackend, C: CameraModel>(
    backend: &B,
    model: &SurfacePyramid<'_>,
    observed: &SurfacePyramid<'_>,
    rig: &mut Rig<C>,
    model_from_rig: &SE3,
    params: &IcpParams,
    criteria: &ProjectiveCriteria,
) -> Result<ProjectiveSummary, IcpError> {
    let num_levels = check_levels(model, observed, criteria)?;
    let gate = params.gate();
    let mut summary = ProjectiveSummary::new(num_levels);
    let mut corrections = vec![SE3::IDENTITY; rig.num_streams()];

    for level in (0..num_levels).rev() {
        let cameras = scaled_stream_cameras(rig, level)?;
        let problems = stream_problems(rig, model, observed, &cameras, level)?;
        let max_iterations = criteria.max_iterations[level];

        let mut level_summary = LevelSummary::new(level, Termination::MaxIterations);
        let mut prev_error = 0.0;
        let mut prev_corrections = corrections.clone();

        for it in 0..max_iterations {
            if backend.is_cancelled() {
                level_summary.termination = Termination::Cancelled;
                break;
            }

            let mut joint = NormalEquations::default();
            let mut next = corrections.clone();
            for (s, problem) in problems.iter().enumerate() {
                let pose = *model_from_rig * corrections[s];
                let ne = backend.accumulate_projective(problem, &pose, &gate)?;
                joint += ne;

                if ne.count == 0 || ne.count < criteria.min_inliers {
                    log::debug!("stream {}: inliers {} too small", s, ne.count);
                    continue;
                }
                match ne.solve() {
                    Some(x) => next[s] = corrections[s] * SE3::exp(&x),
                    None => log::warn!("stream {}: singular normal equations", s),
                }
            }

            level_summary.error = joint.error;
            level_summary.count = joint.count;

            if joint.count == 0 || joint.count < criteria.min_inliers {
                log::warn!(
                    "inliers {} in pyramid level {} too small, skipping",
                    joint.count,
                    level
                );
                level_summary.termination = Termination::InsufficientInliers;
                break;
            }

            if it > 0 && diverged(joint.error, prev_error, criteria.max_relative_increase) {
                log::warn!(
                    "level {}: error increased from {} to {}, restoring the previous corrections",
                    level,
                    prev_error,
                    joint.error
                );
                corrections = prev_corrections;
                level_summary.iterations = level_summary.iterations.saturating_sub(1);
                level_summary.termination = Termination::Diverged;
                break;
            }

            prev_corrections = std::mem::replace(&mut corrections, next);
            level_summary.iterations += 1;

            let change = relative_change(joint.error, prev_error);
            log::debug!(
                "lvl {} it {}: err={} dErr/err={} inliers={}",
                level,
                it,
                joint.error,
                change,
                joint.count
            );

            if it > 0 && change < criteria.relative_tolerance {
                level_summary.termination = Termination::Converged;
                break;
            }
            prev_error = joint.error;
        }

        level_summary.log_error = level_summary.error.ln();
        log::info!(
            "level {}: err={} log_err={} inliers={} iterations={} ({:?})",
            level,
            level_summary.error,
            level_summary.log_error,
            level_summary.count,
            level_summary.iterations,
            level_summary.termination
        );
        summary.levels[level] = level_summary;

        if level_summary.termination == Termination::Cancelled {
            break;
        }
    }

    for (s, correction) in corrections.iter().enumerate() {
        let camera = rig.stream_camera_index(s)?;
        let rig_from_cameras = rig.rig_from_cameras_mut();
        rig_from_cameras[camera] = *correction * rig_from_cameras[camera];
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, ExecutionStrategy};
    use crate::kernel::Gate;
    use crate::testing;
    use kornia_3d::camera::{PinholeCamera, Poly3Camera};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    const NUM_LEVELS: usize = 3;

    fn criteria() -> ProjectiveCriteria {
        ProjectiveCriteria::default().with_max_iterations(vec![15, 10, 10])
    }

    // records the width of every observed surface it is asked to accumulate
    #[derive(Default)]
    struct RecordingBackend {
        widths: Mutex<Vec<usize>>,
        count: usize,
    }

    impl AccumulationBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn accumulate_projective<C: CameraModel>(
            &self,
            problem: &ProjectiveProblem<'_, C>,
            _model_from_observed: &SE3,
            _gate: &Gate,
        ) -> Result<NormalEquations, IcpError> {
            if let Ok(mut widths) = self.widths.lock() {
                widths.push(problem.observed.width());
            }
            let mut ne = NormalEquations::default();
            for i in 0..6 {
                let mut a = [0.0; 6];
                a[i] = 1.0;
                ne.add_row(&a, 0.0);
            }
            ne.error = 1.0;
            ne.count = self.count;
            Ok(ne)
        }
    }

    fn two_camera_rig() -> Result<Rig<PinholeCamera>, IcpError> {
        let camera = testing::camera();
        let tilted = SE3::new(
            kornia_lie::SO3::exp(Vec3::new(0.0, 10f32.to_radians(), 0.0)),
            Vec3::new(0.2, 0.0, 0.0),
        );
        Ok(Rig::new(
            vec![camera, camera],
            vec![SE3::IDENTITY, tilted],
            vec![0, 1],
            testing::WIDTH,
            testing::HEIGHT,
        )?)
    }

    fn truth() -> SE3 {
        SE3::exp(&[0.01, -0.015, 0.02, 0.02, -0.015, 0.01])
    }

    #[test]
    fn test_projective_recovers_transform() -> Result<(), IcpError> {
        let camera = testing::camera();
        let (w, h) = (testing::WIDTH, testing::HEIGHT);
        let truth = truth();

        let (pts_m, nrm_m) = testing::pyramids(testing::render(&camera, w, h, &SE3::IDENTITY), NUM_LEVELS);
        let (pts_o, nrm_o) = testing::pyramids(testing::render(&camera, w, h, &truth), NUM_LEVELS);

        let mut pose = SE3::IDENTITY;
        let summary = icp_projective(
            &CpuBackend::default(),
            &SurfacePyramid::new(&pts_m, &nrm_m)?,
            &SurfacePyramid::new(&pts_o, &nrm_o)?,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;

        assert_eq!(summary.levels.len(), NUM_LEVELS);
        assert!(summary.levels.iter().all(|l| l.iterations > 0), "{summary:?}");
        assert!(summary.levels[0].count > 500);
        assert!(summary.covariance.is_some());
        assert!(testing::translation_error(&pose, &truth) < 1e-2, "{pose:?}");
        assert!(testing::rotation_error_deg(&pose, &truth) < 0.3, "{pose:?}");
        Ok(())
    }

    #[test]
    fn test_rig_joint_recovers_transform() -> Result<(), IcpError> {
        let rig = two_camera_rig()?;
        let truth = truth();

        let (pts_m, nrm_m) = testing::pyramids(testing::render_rig(&rig, &SE3::IDENTITY), NUM_LEVELS);
        let (pts_o, nrm_o) = testing::pyramids(testing::render_rig(&rig, &truth), NUM_LEVELS);

        let mut pose = SE3::IDENTITY;
        let summary = icp_projective_rig(
            &CpuBackend::default(),
            &SurfacePyramid::new(&pts_m, &nrm_m)?,
            &SurfacePyramid::new(&pts_o, &nrm_o)?,
            &rig,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;

        let covariance = summary.covariance.ok_or(IcpError::NoLevels)?;
        for i in 0..6 {
            assert!(covariance[i][i] > 0.0);
        }
        for l in &summary.levels {
            assert!((l.log_error - l.error.ln()).abs() < 1e-6 || l.error == 0.0);
        }
        assert!(testing::translation_error(&pose, &truth) < 1e-2, "{pose:?}");
        assert!(testing::rotation_error_deg(&pose, &truth) < 0.3, "{pose:?}");
        Ok(())
    }

    #[test]
    fn test_joint_and_per_stream_agree_single_stream() -> Result<(), IcpError> {
        let camera = testing::camera();
        let mut rig = Rig::new(
            vec![camera],
            vec![SE3::IDENTITY],
            vec![0],
            testing::WIDTH,
            testing::HEIGHT,
        )?;
        let truth = truth();

        let (pts_m, nrm_m) = testing::pyramids(testing::render_rig(&rig, &SE3::IDENTITY), NUM_LEVELS);
        let (pts_o, nrm_o) = testing::pyramids(testing::render_rig(&rig, &truth), NUM_LEVELS);
        let model = SurfacePyramid::new(&pts_m, &nrm_m)?;
        let observed = SurfacePyramid::new(&pts_o, &nrm_o)?;
        let backend = CpuBackend::new(ExecutionStrategy::Serial);

        let mut joint = SE3::IDENTITY;
        icp_projective_rig(&backend, &model, &observed, &rig, &mut joint, &IcpParams::default(), &criteria())?;

        icp_projective_rig_per_stream(
            &backend,
            &model,
            &observed,
            &mut rig,
            &SE3::IDENTITY,
            &IcpParams::default(),
            &criteria(),
        )?;
        let per_stream = rig.rig_from_cameras()[0];

        assert!(testing::translation_error(&joint, &per_stream) < 1e-3);
        assert!(testing::rotation_error_deg(&joint, &per_stream) < 0.05);
        Ok(())
    }

    #[test]
    fn test_per_stream_refines_extrinsics() -> Result<(), IcpError> {
        let mut rig = two_camera_rig()?;
        let before = rig.rig_from_cameras().to_vec();
        let truth = truth();

        let (pts_m, nrm_m) = testing::pyramids(testing::render_rig(&rig, &SE3::IDENTITY), NUM_LEVELS);
        let (pts_o, nrm_o) = testing::pyramids(testing::render_rig(&rig, &truth), NUM_LEVELS);

        let model_from_rig = SE3::IDENTITY;
        let summary = icp_projective_rig_per_stream(
            &CpuBackend::default(),
            &SurfacePyramid::new(&pts_m, &nrm_m)?,
            &SurfacePyramid::new(&pts_o, &nrm_o)?,
            &mut rig,
            &model_from_rig,
            &IcpParams::default(),
            &criteria(),
        )?;
        assert!(summary.covariance.is_none());

        // every stream absorbed the rig motion into its own correction
        for (after, before) in rig.rig_from_cameras().iter().zip(before.iter()) {
            let correction = *after * before.inverse();
            assert!(testing::translation_error(&correction, &truth) < 1e-2, "{correction:?}");
            assert!(testing::rotation_error_deg(&correction, &truth) < 0.3, "{correction:?}");
        }
        Ok(())
    }

    #[test]
    fn test_levels_run_coarse_to_fine() -> Result<(), IcpError> {
        let camera = testing::camera();
        let (pts, nrm) = testing::pyramids(
            testing::render(&camera, testing::WIDTH, testing::HEIGHT, &SE3::IDENTITY),
            NUM_LEVELS,
        );
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;
        let backend = RecordingBackend {
            count: 100,
            ..Default::default()
        };

        let mut pose = SE3::IDENTITY;
        let summary = icp_projective(
            &backend,
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;

        let widths = backend.widths.lock().map(|w| w.clone()).unwrap_or_default();
        assert!(widths.windows(2).all(|w| w[0] <= w[1]), "{widths:?}");
        let mut visited = widths.clone();
        visited.dedup();
        assert_eq!(visited, vec![16, 32, 64]);

        // zero updates converge on the second iteration of every level
        for level in &summary.levels {
            assert_eq!(level.termination, Termination::Converged);
            assert_eq!(level.iterations, 2);
        }
        assert_eq!(pose, SE3::IDENTITY);
        Ok(())
    }

    #[test]
    fn test_projective_recovers_transform_distorted() -> Result<(), IcpError> {
        let camera = Poly3Camera {
            fx: 60.0,
            fy: 60.0,
            cx: 31.5,
            cy: 23.5,
            k: [-0.05, 0.01, 0.0],
        };
        let (w, h) = (testing::WIDTH, testing::HEIGHT);
        let truth = truth();

        let (pts_m, nrm_m) = testing::pyramids(testing::render(&camera, w, h, &SE3::IDENTITY), NUM_LEVELS);
        let (pts_o, nrm_o) = testing::pyramids(testing::render(&camera, w, h, &truth), NUM_LEVELS);

        let mut pose = SE3::IDENTITY;
        let summary = icp_projective(
            &CpuBackend::default(),
            &SurfacePyramid::new(&pts_m, &nrm_m)?,
            &SurfacePyramid::new(&pts_o, &nrm_o)?,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;

        assert!(summary.levels[0].count > 500, "{summary:?}");
        assert!(testing::translation_error(&pose, &truth) < 1e-2, "{pose:?}");
        assert!(testing::rotation_error_deg(&pose, &truth) < 0.3, "{pose:?}");
        Ok(())
    }

    #[test]
    fn test_inliers_drop_mid_level() -> Result<(), IcpError> {
        // one good accumulation, then too few pairs for the rest of the run
        struct Starving(std::sync::atomic::AtomicUsize);

        impl AccumulationBackend for Starving {
            fn name(&self) -> &'static str {
                "starving"
            }

            fn accumulate_projective<C: CameraModel>(
                &self,
                _problem: &ProjectiveProblem<'_, C>,
                _model_from_observed: &SE3,
                _gate: &Gate,
            ) -> Result<NormalEquations, IcpError> {
                let calls = self.0.fetch_add(1, Ordering::Relaxed);
                let mut ne = NormalEquations::default();
                for i in 0..6 {
                    let mut a = [0.0; 6];
                    a[i] = 1.0;
                    ne.add_row(&a, 0.01);
                }
                ne.error = 1.0;
                ne.count = if calls == 0 { 100 } else { 3 };
                Ok(ne)
            }
        }

        let camera = testing::camera();
        let (pts, nrm) = testing::pyramids(
            testing::render(&camera, testing::WIDTH, testing::HEIGHT, &SE3::IDENTITY),
            NUM_LEVELS,
        );
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;

        let start = SE3::exp(&[0.0, 0.05, 0.0, 0.1, 0.0, 0.0]);
        let mut pose = start;
        let summary = icp_projective(
            &Starving(std::sync::atomic::AtomicUsize::new(0)),
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;

        let coarsest = summary.levels[NUM_LEVELS - 1];
        assert_eq!(coarsest.termination, Termination::InsufficientInliers);
        assert_eq!(coarsest.iterations, 1);
        assert_eq!(coarsest.count, 3);
        for level in &summary.levels[..NUM_LEVELS - 1] {
            assert_eq!(level.termination, Termination::InsufficientInliers);
            assert_eq!(level.iterations, 0);
        }

        // only the first update was applied
        let expected = start * SE3::exp(&[0.01; 6]);
        assert!(testing::translation_error(&pose, &expected) < 1e-5, "{pose:?}");
        assert!(testing::rotation_error_deg(&pose, &expected) < 1e-3, "{pose:?}");
        Ok(())
    }

    #[test]
    fn test_insufficient_inliers_skips_levels() -> Result<(), IcpError> {
        let mut rig = two_camera_rig()?;
        let (pts, nrm) = testing::pyramids(testing::render_rig(&rig, &SE3::IDENTITY), NUM_LEVELS);
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;
        let backend = RecordingBackend {
            count: 4,
            ..Default::default()
        };

        let start = SE3::exp(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let mut pose = start;
        let summary = icp_projective_rig(
            &backend,
            &surfaces,
            &surfaces,
            &rig,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;
        assert_eq!(pose, start);
        for level in &summary.levels {
            assert_eq!(level.termination, Termination::InsufficientInliers);
        }

        // two streams with 4 pairs each stay below the threshold of 10
        let before = rig.rig_from_cameras().to_vec();
        icp_projective_rig_per_stream(
            &backend,
            &surfaces,
            &surfaces,
            &mut rig,
            &start,
            &IcpParams::default(),
            &criteria(),
        )?;
        assert_eq!(rig.rig_from_cameras(), before.as_slice());
        Ok(())
    }

    #[test]
    fn test_cancelled_before_start() -> Result<(), IcpError> {
        let camera = testing::camera();
        let (pts, nrm) = testing::pyramids(
            testing::render(&camera, testing::WIDTH, testing::HEIGHT, &SE3::IDENTITY),
            NUM_LEVELS,
        );
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;

        let token = Arc::new(AtomicBool::new(false));
        token.store(true, Ordering::Relaxed);
        let backend = CpuBackend::default().with_cancel_token(token);

        let mut pose = SE3::IDENTITY;
        let summary = icp_projective(
            &backend,
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        )?;
        assert!(summary.is_cancelled());
        assert!(summary.levels.iter().all(|l| l.iterations == 0));
        Ok(())
    }

    #[test]
    fn test_level_checks() -> Result<(), IcpError> {
        let camera = testing::camera();
        let (pts, nrm) = testing::pyramids(
            testing::render(&camera, testing::WIDTH, testing::HEIGHT, &SE3::IDENTITY),
            2,
        );
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;
        let backend = CpuBackend::default();
        let mut pose = SE3::IDENTITY;

        let result = icp_projective(
            &backend,
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        );
        assert_eq!(result, Err(IcpError::LevelMismatch(2, 3)));

        let result = icp_projective(
            &backend,
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &ProjectiveCriteria::default().with_max_iterations(vec![]),
        );
        assert_eq!(result, Err(IcpError::NoLevels));
        Ok(())
    }

    #[test]
    fn test_unsupported_backend() -> Result<(), IcpError> {
        struct AssociatedOnly;

        impl AccumulationBackend for AssociatedOnly {
            fn name(&self) -> &'static str {
                "associated-only"
            }
        }

        let camera = testing::camera();
        let (pts, nrm) = testing::pyramids(
            testing::render(&camera, testing::WIDTH, testing::HEIGHT, &SE3::IDENTITY),
            NUM_LEVELS,
        );
        let surfaces = SurfacePyramid::new(&pts, &nrm)?;
        let mut pose = SE3::IDENTITY;
        let result = icp_projective(
            &AssociatedOnly,
            &surfaces,
            &surfaces,
            &camera,
            &SE3::IDENTITY,
            &mut pose,
            &IcpParams::default(),
            &criteria(),
        );
        assert!(matches!(result, Err(IcpError::Unsupported { .. })));
        Ok(())
    }
}
