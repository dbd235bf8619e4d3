use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use kornia_3d::{
    camera::CameraModel,
    grid::{is_valid, GridError, GridView},
};
use kornia_lie::SE3;
use rayon::prelude::*;

use crate::error::IcpError;
use crate::kernel::{accumulate_pair, project_to_model, Gate, Perturbation, PointPair};
use crate::normal_equations::NormalEquations;
use crate::surface::Surface;

/// Model and observed surfaces paired through an explicit correspondence map.
#[derive(Debug, Clone, Copy)]
pub struct AssociatedProblem<'a> {
    /// The model surface. Correspondences index its cells in row-major order.
    pub model: Surface<'a>,
    /// The observed surface.
    pub observed: Surface<'a>,
    /// The model index of every observed cell, `None` when unassociated.
    pub associations: GridView<'a, Option<usize>>,
}

/// Model and observed surfaces paired by projecting into a model camera.
#[derive(Debug)]
pub struct ProjectiveProblem<'a, C: CameraModel> {
    /// The model surface as seen from `camera`.
    pub model: Surface<'a>,
    /// The observed surface.
    pub observed: Surface<'a>,
    /// The camera model at the resolution of `model`.
    pub camera: &'a C,
    /// The transform from the model frame to the camera frame.
    pub camera_from_model: SE3,
}

impl<C: CameraModel> Clone for ProjectiveProblem<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: CameraModel> Copy for ProjectiveProblem<'_, C> {}

/// Computes the normal equations of one iteration over all candidate pairs.
///
/// The default implementations report the operation as unsupported, so a
/// backend only implements what it can run.
pub trait AccumulationBackend {
    /// A short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Accumulate the pairs of an explicit association, linearized on the left.
    fn accumulate_associated(
        &self,
        _problem: &AssociatedProblem<'_>,
        _model_from_observed: &SE3,
        _gate: &Gate,
    ) -> Result<NormalEquations, IcpError> {
        Err(IcpError::Unsupported {
            backend: self.name(),
            operation: "associated accumulation",
        })
    }

    /// Accumulate the pairs found by projective association, linearized on the right.
    fn accumulate_projective<C: CameraModel>(
        &self,
        _problem: &ProjectiveProblem<'_, C>,
        _model_from_observed: &SE3,
        _gate: &Gate,
    ) -> Result<NormalEquations, IcpError> {
        Err(IcpError::Unsupported {
            backend: self.name(),
            operation: "projective accumulation",
        })
    }

    /// Whether the caller asked to stop. Checked between iterations.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Controls how the per point accumulation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool and process rows in parallel.
    #[default]
    Parallel,

    /// Run sequentially on the current thread.
    ///
    /// Useful for small clouds, debugging, or reproducible summation order.
    Serial,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every call, which has significant overhead.
    Fixed(usize),
}

/// Accumulates on the CPU.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    strategy: ExecutionStrategy,
    cancel_token: Option<Arc<AtomicBool>>,
}

impl CpuBackend {
    /// Create a backend with the given execution strategy.
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            cancel_token: None,
        }
    }

    /// Stop the drivers between iterations once `cancel_token` is set.
    pub fn with_cancel_token(mut self, cancel_token: Arc<AtomicBool>) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    /// The execution strategy.
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    // fold every row of `height` into one system
    fn reduce_rows(
        &self,
        height: usize,
        row: impl Fn(&mut NormalEquations, usize) + Send + Sync,
    ) -> Result<NormalEquations, IcpError> {
        let parallel = || {
            (0..height)
                .into_par_iter()
                .fold(NormalEquations::default, |mut acc, y| {
                    row(&mut acc, y);
                    acc
                })
                .reduce(NormalEquations::default, |a, b| a + b)
        };

        match self.strategy {
            ExecutionStrategy::Serial => Ok((0..height).fold(NormalEquations::default(), |mut acc, y| {
                row(&mut acc, y);
                acc
            })),
            ExecutionStrategy::Parallel => Ok(parallel()),
            ExecutionStrategy::Fixed(0) => Err(IcpError::InvalidThreadCount(0)),
            ExecutionStrategy::Fixed(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| IcpError::ThreadPool(e.to_string()))?;
                Ok(pool.install(parallel))
            }
        }
    }
}

impl AccumulationBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn accumulate_associated(
        &self,
        problem: &AssociatedProblem<'_>,
        model_from_observed: &SE3,
        gate: &Gate,
    ) -> Result<NormalEquations, IcpError> {
        let AssociatedProblem {
            model,
            observed,
            associations,
        } = *problem;

        if !associations.same_shape(&observed.points) {
            return Err(GridError::ShapeMismatch(
                observed.width(),
                observed.height(),
                associations.width(),
                associations.height(),
            )
            .into());
        }

        let num_model = model.width() * model.height();
        if let Some(&bad) = associations
            .rows()
            .flatten()
            .flatten()
            .find(|&&j| j >= num_model)
        {
            return Err(IcpError::InvalidCorrespondence(bad, num_model));
        }

        self.reduce_rows(observed.height(), |acc, y| {
            let row = observed.points.row(y).iter().zip(observed.normals.row(y));
            for ((&p_o, &n_o), assoc) in row.zip(associations.row(y)) {
                let Some(j) = *assoc else {
                    continue;
                };
                let Some((p_m, n_m)) = model.get(j % model.width(), j / model.width()) else {
                    continue;
                };
                let pair = PointPair {
                    model_point: p_m,
                    model_normal: n_m,
                    observed_point: p_o,
                    observed_normal: n_o,
                };
                accumulate_pair(acc, &pair, model_from_observed, gate, Perturbation::Left);
            }
        })
    }

    fn accumulate_projective<C: CameraModel>(
        &self,
        problem: &ProjectiveProblem<'_, C>,
        model_from_observed: &SE3,
        gate: &Gate,
    ) -> Result<NormalEquations, IcpError> {
        let ProjectiveProblem {
            model,
            observed,
            camera,
            camera_from_model,
        } = *problem;

        self.reduce_rows(observed.height(), |acc, y| {
            let row = observed.points.row(y).iter().zip(observed.normals.row(y));
            for (&p_o, &n_o) in row {
                if !is_valid(p_o) {
                    continue;
                }
                let Some((u, v)) =
                    project_to_model(&model, camera, &camera_from_model, model_from_observed, p_o)
                else {
                    continue;
                };
                let Some((p_m, n_m)) = model.get(u, v) else {
                    continue;
                };
                let pair = PointPair {
                    model_point: p_m,
                    model_normal: n_m,
                    observed_point: p_o,
                    observed_normal: n_o,
                };
                accumulate_pair(acc, &pair, model_from_observed, gate, Perturbation::Right);
            }
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }
}
