use serde::{Deserialize, Serialize};

use crate::kernel::Gate;

/// The residual minimized by the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResidualMetric {
    /// Distance of the observed point to the tangent plane of the model point.
    #[default]
    PointToPlane,
    /// Euclidean distance between the two points.
    PointToPoint,
}

/// Correspondence gating and residual selection shared by all drivers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpParams {
    /// Maximum angle in degrees between the model normal and the transformed observed normal.
    pub max_angle_deg: f32,
    /// Maximum residual for a pair to be accepted.
    pub max_distance: f32,
    /// The residual metric.
    pub metric: ResidualMetric,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_angle_deg: 30.0,
            max_distance: 0.1,
            metric: ResidualMetric::PointToPlane,
        }
    }
}

impl IcpParams {
    /// Set the maximum normal angle in degrees.
    pub fn with_max_angle_deg(mut self, max_angle_deg: f32) -> Self {
        self.max_angle_deg = max_angle_deg;
        self
    }

    /// Set the maximum residual.
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Set the residual metric.
    pub fn with_metric(mut self, metric: ResidualMetric) -> Self {
        self.metric = metric;
        self
    }

    /// The per pair acceptance test.
    pub fn gate(&self) -> Gate {
        Gate {
            cos_max_angle: self.max_angle_deg.to_radians().cos(),
            max_distance: self.max_distance,
            metric: self.metric,
        }
    }
}

/// Stopping rules of the single level solver with a fixed association.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceCriteria {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Minimum number of accepted pairs to take a step. When unset the
    /// threshold is `associations / inlier_divisor`.
    pub min_inliers: Option<usize>,
    /// Divides the number of associations into the default pair threshold.
    pub inlier_divisor: usize,
    /// Stop once the relative change of the mean error drops below this value.
    pub relative_tolerance: f32,
    /// Stop and restore the previous pose when the error grows by more than
    /// this fraction. Disabled by default.
    pub max_relative_increase: Option<f32>,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            min_inliers: None,
            inlier_divisor: 50,
            relative_tolerance: 1e-7,
            max_relative_increase: None,
        }
    }
}

impl ConvergenceCriteria {
    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set a fixed minimum number of accepted pairs.
    pub fn with_min_inliers(mut self, min_inliers: usize) -> Self {
        self.min_inliers = Some(min_inliers);
        self
    }

    /// Set the divisor of the association count used when no fixed minimum is set.
    pub fn with_inlier_divisor(mut self, inlier_divisor: usize) -> Self {
        self.inlier_divisor = inlier_divisor;
        self
    }

    /// Set the relative error tolerance.
    pub fn with_relative_tolerance(mut self, relative_tolerance: f32) -> Self {
        self.relative_tolerance = relative_tolerance;
        self
    }

    /// Enable divergence detection.
    pub fn with_max_relative_increase(mut self, max_relative_increase: f32) -> Self {
        self.max_relative_increase = Some(max_relative_increase);
        self
    }

    /// The pair threshold for a map with `num_associations` entries.
    pub fn min_inliers_for(&self, num_associations: usize) -> usize {
        self.min_inliers
            .unwrap_or(num_associations / self.inlier_divisor.max(1))
    }
}

/// Stopping rules of the nearest neighbor driven solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestNeighborCriteria {
    /// Maximum number of association rounds.
    pub max_iterations: usize,
    /// Number of solves that reuse one association.
    pub inner_iterations: usize,
    /// Stop once the relative change of the mean error drops below this value.
    pub relative_tolerance: f32,
    /// Associate only every n-th observed point.
    pub downsample: usize,
    /// A solve needs `associations / inlier_divisor` accepted pairs.
    pub inlier_divisor: usize,
    /// Stop and restore the previous pose when the error grows by more than
    /// this fraction. Disabled by default.
    pub max_relative_increase: Option<f32>,
}

impl Default for NearestNeighborCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            inner_iterations: 1,
            relative_tolerance: 1e-5,
            downsample: 1,
            inlier_divisor: 50,
            max_relative_increase: None,
        }
    }
}

impl NearestNeighborCriteria {
    /// Set the maximum number of association rounds.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the number of solves per association round.
    pub fn with_inner_iterations(mut self, inner_iterations: usize) -> Self {
        self.inner_iterations = inner_iterations;
        self
    }

    /// Set the relative error tolerance.
    pub fn with_relative_tolerance(mut self, relative_tolerance: f32) -> Self {
        self.relative_tolerance = relative_tolerance;
        self
    }

    /// Set the association stride.
    pub fn with_downsample(mut self, downsample: usize) -> Self {
        self.downsample = downsample;
        self
    }
}

/// Stopping rules of the projective pyramid drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectiveCriteria {
    /// Iteration budget per level, indexed by level. Level 0 is the finest.
    pub max_iterations: Vec<usize>,
    /// Minimum number of accepted pairs to take a step at a level.
    pub min_inliers: usize,
    /// Stop a level once the relative change of the error drops below this value.
    pub relative_tolerance: f32,
    /// Stop a level and restore the previous pose when the error grows by
    /// more than this fraction. Disabled by default.
    pub max_relative_increase: Option<f32>,
}

impl Default for ProjectiveCriteria {
    fn default() -> Self {
        Self {
            max_iterations: vec![10, 5, 4],
            min_inliers: 10,
            relative_tolerance: 1e-7,
            max_relative_increase: None,
        }
    }
}

impl ProjectiveCriteria {
    /// Set the iteration budget per level, finest first.
    pub fn with_max_iterations(mut self, max_iterations: Vec<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative error tolerance.
    pub fn with_relative_tolerance(mut self, relative_tolerance: f32) -> Self {
        self.relative_tolerance = relative_tolerance;
        self
    }

    /// Enable divergence detection.
    pub fn with_max_relative_increase(mut self, max_relative_increase: f32) -> Self {
        self.max_relative_increase = Some(max_relative_increase);
        self
    }
}
