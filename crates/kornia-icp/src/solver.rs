use glam::Vec3;
use kornia_lie::SE3;

use crate::backend::{AccumulationBackend, AssociatedProblem};
use crate::correspondence::{find_correspondences, NearestNeighborSearch};
use crate::error::IcpError;
use crate::params::{ConvergenceCriteria, IcpParams, NearestNeighborCriteria};
use crate::surface::Surface;

/// Why an optimization loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The relative change of the error dropped below the tolerance.
    Converged,
    /// The iteration budget was used up.
    MaxIterations,
    /// Too few pairs were accepted to take a step.
    InsufficientInliers,
    /// The normal equations could not be solved.
    SingularSystem,
    /// The error grew by more than the allowed fraction; the previous pose was restored.
    Diverged,
    /// The caller cancelled the optimization.
    Cancelled,
}

/// The outcome of a single level optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpSummary {
    /// The mean squared residual of the last accumulation.
    pub error: f32,
    /// The number of accepted pairs of the last accumulation.
    pub count: usize,
    /// The number of pose updates applied.
    pub iterations: usize,
    /// Why the loop stopped.
    pub termination: Termination,
}

/// The relative change `|error - prev| / error`, with `0 / 0` treated as no change.
pub(crate) fn relative_change(error: f32, prev: f32) -> f32 {
    if error > 0.0 {
        (error - prev).abs() / error
    } else if prev == 0.0 {
        0.0
    } else {
        f32::INFINITY
    }
}

/// Whether `error` grew by more than `max_relative_increase` over `prev`.
pub(crate) fn diverged(error: f32, prev: f32, max_relative_increase: Option<f32>) -> bool {
    max_relative_increase.is_some_and(|max| error > prev * (1.0 + max))
}

/// Point-to-plane ICP with a fixed correspondence map.
///
/// Each iteration linearizes all associated pairs around the current estimate,
/// solves the normalized normal equations and applies `T_mo <- Exp(x) T_mo`.
/// The loop stops without an update once fewer than `criteria.min_inliers`
/// pairs are accepted, or `associations / criteria.inlier_divisor` when no
/// fixed minimum is set.
///
/// # Arguments
///
/// * `backend` - The accumulation backend.
/// * `problem` - The model and observed surfaces and their association.
/// * `model_from_observed` - The pose `T_mo`, updated in place.
/// * `params` - Correspondence gating.
/// * `criteria` - Stopping rules.
///
/// # Returns
///
/// A summary of the last iteration. Too few pairs or a singular system end the
/// loop early and keep the last pose.
pub fn icp_given_association<B: AccumulationBackend>(
    backend: &B,
    problem: &AssociatedProblem<'_>,
    model_from_observed: &mut SE3,
    params: &IcpParams,
    criteria: &ConvergenceCriteria,
) -> Result<IcpSummary, IcpError> {
    let gate = params.gate();
    let num_associations = problem
        .associations
        .rows()
        .flatten()
        .filter(|a| a.is_some())
        .count();
    let min_inliers = criteria.min_inliers_for(num_associations);

    let mut summary = IcpSummary {
        error: 0.0,
        count: 0,
        iterations: 0,
        termination: Termination::MaxIterations,
    };
    let mut prev_error = 0.0;
    let mut prev_pose = *model_from_observed;

    for it in 0..criteria.max_iterations {
        if backend.is_cancelled() {
            summary.termination = Termination::Cancelled;
            break;
        }

        let ne = backend.accumulate_associated(problem, model_from_observed, &gate)?;
        summary.count = ne.count;
        summary.error = ne.mean_error();

        if ne.count == 0 || ne.count < min_inliers {
            log::debug!(
                "inliers {} below {} of {} associations, stopping",
                ne.count,
                min_inliers,
                num_associations
            );
            summary.termination = Termination::InsufficientInliers;
            break;
        }

        let ne = ne.normalized();

        if it > 0 && diverged(ne.error, prev_error, criteria.max_relative_increase) {
            log::warn!(
                "error increased from {} to {}, restoring the previous pose",
                prev_error,
                ne.error
            );
            *model_from_observed = prev_pose;
            summary.iterations = summary.iterations.saturating_sub(1);
            summary.termination = Termination::Diverged;
            break;
        }

        let Some(x) = ne.solve() else {
            log::warn!("singular normal equations at iteration {}", it);
            summary.termination = Termination::SingularSystem;
            break;
        };

        prev_pose = *model_from_observed;
        *model_from_observed = SE3::exp(&x) * *model_from_observed;
        summary.iterations += 1;

        let change = relative_change(ne.error, prev_error);
        log::debug!(
            "it {}: err={} dErr/err={} inliers={} |w|={}deg |v|={}",
            it,
            ne.error,
            change,
            ne.count,
            Vec3::new(x[0], x[1], x[2]).length().to_degrees(),
            Vec3::new(x[3], x[4], x[5]).length()
        );

        if it > 0 && change < criteria.relative_tolerance {
            summary.termination = Termination::Converged;
            break;
        }
        prev_error = ne.error;
    }

    Ok(summary)
}

/// Point-to-plane ICP that re-associates with a nearest neighbor search.
///
/// Every round associates the observed points at the current pose, then runs
/// [`icp_given_association`] for `inner_iterations` solves with a minimum inlier
/// count of `associations / inlier_divisor`.
///
/// # Arguments
///
/// * `backend` - The accumulation backend.
/// * `search` - The nearest neighbor index over `model.points`, indexed in row-major order.
/// * `model` - The model points and normals.
/// * `observed` - The observed points and normals.
/// * `model_from_observed` - The pose `T_mo`, updated in place.
/// * `params` - Correspondence gating.
/// * `criteria` - Stopping rules.
pub fn icp_nearest_neighbor<B: AccumulationBackend, S: NearestNeighborSearch>(
    backend: &B,
    search: &S,
    model: Surface<'_>,
    observed: Surface<'_>,
    model_from_observed: &mut SE3,
    params: &IcpParams,
    criteria: &NearestNeighborCriteria,
) -> Result<IcpSummary, IcpError> {
    let mut summary = IcpSummary {
        error: 0.0,
        count: 0,
        iterations: 0,
        termination: Termination::MaxIterations,
    };
    let mut prev_error = 0.0;
    let mut prev_pose = *model_from_observed;

    for it in 0..criteria.max_iterations {
        let round_pose = *model_from_observed;
        let (associations, num_associations) = find_correspondences(
            search,
            observed.points,
            model_from_observed,
            criteria.downsample,
        );

        let problem = AssociatedProblem {
            model,
            observed,
            associations: associations.view(),
        };
        let inner = ConvergenceCriteria {
            max_iterations: criteria.inner_iterations,
            min_inliers: None,
            inlier_divisor: criteria.inlier_divisor,
            relative_tolerance: ConvergenceCriteria::default().relative_tolerance,
            max_relative_increase: None,
        };
        let round = icp_given_association(backend, &problem, model_from_observed, params, &inner)?;

        summary.count = round.count;
        summary.error = round.error;
        summary.iterations += round.iterations;

        match round.termination {
            Termination::InsufficientInliers
            | Termination::SingularSystem
            | Termination::Cancelled => {
                summary.termination = round.termination;
                break;
            }
            _ => {}
        }

        if it > 0 && diverged(round.error, prev_error, criteria.max_relative_increase) {
            log::warn!(
                "error increased from {} to {}, restoring the previous pose",
                prev_error,
                round.error
            );
            *model_from_observed = prev_pose;
            summary.termination = Termination::Diverged;
            break;
        }

        let change = relative_change(round.error, prev_error);
        log::debug!(
            "round {}: err={} dErr/err={} inliers={} associations={}",
            it,
            round.error,
            change,
            round.count,
            num_associations
        );

        if it > 0 && change < criteria.relative_tolerance {
            summary.termination = Termination::Converged;
            break;
        }
        prev_error = round.error;
        prev_pose = round_pose;
    }

    log::info!(
        "nearest neighbor icp: err={} inliers={} iterations={} ({:?})",
        summary.error,
        summary.count,
        summary.iterations,
        summary.termination
    );

    Ok(summary)
}
