use kornia_3d::{grid::GridError, rig::RigError};

/// Errors raised by the registration drivers.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum IcpError {
    /// The accumulation backend does not implement the requested operation.
    #[error("The {backend} backend does not support {operation}")]
    Unsupported {
        /// The backend name.
        backend: &'static str,
        /// The requested operation.
        operation: &'static str,
    },

    /// The thread count of a fixed pool must be positive.
    #[error("Thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),

    /// The thread pool failed to build.
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),

    /// The pyramids provide fewer levels than iteration budgets.
    #[error("Pyramids have {0} levels but {1} iteration budgets were given")]
    LevelMismatch(usize, usize),

    /// Two pyramids that must share a shape do not.
    #[error("Pyramid shapes do not match")]
    PyramidShapeMismatch,

    /// A pyramid level does not exist.
    #[error("Pyramid level {0} does not exist")]
    MissingLevel(usize),

    /// No iteration budget was given.
    #[error("At least one pyramid level is required")]
    NoLevels,

    /// A correspondence points outside of the model cloud.
    #[error("Correspondence {0} is out of range for a model with {1} points")]
    InvalidCorrespondence(usize, usize),

    /// Grid shapes or regions are inconsistent.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// The rig descriptor is inconsistent.
    #[error(transparent)]
    Rig(#[from] RigError),
}
