#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Accumulation backends.
pub mod backend;
pub use backend::{
    AccumulationBackend, AssociatedProblem, CpuBackend, ExecutionStrategy, ProjectiveProblem,
};

/// Nearest neighbor correspondence search.
pub mod correspondence;
pub use correspondence::{find_correspondences, KdTreeSearch, NearestNeighborSearch, Neighbor};

mod error;
pub use error::IcpError;

pub mod kernel;

mod normal_equations;
pub use normal_equations::NormalEquations;

/// Registration parameters.
pub mod params;
pub use params::{
    ConvergenceCriteria, IcpParams, NearestNeighborCriteria, ProjectiveCriteria, ResidualMetric,
};

mod projective;
pub use projective::{
    icp_projective, icp_projective_rig, icp_projective_rig_per_stream, LevelSummary,
    ProjectiveSummary,
};

mod solver;
pub use solver::{icp_given_association, icp_nearest_neighbor, IcpSummary, Termination};

mod surface;
pub use surface::{Surface, SurfacePyramid};

#[cfg(test)]
mod testing;
