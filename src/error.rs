//! Error taxonomy for the reconstruction core.
//!
//! Configuration errors are raised at construction time and propagate to the
//! caller uncaught; there is no retry logic anywhere in the crate. Numerical
//! edge cases (near-zero thresholding denominators) are guarded with an
//! epsilon floor instead of surfacing here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Requested transform name is not in the registry.
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    /// Per-scale weight and patch-shape lists disagree in length.
    #[error("weights and patch shapes must have the same length ({weights} != {patches})")]
    ScaleListMismatch { weights: usize, patches: usize },

    /// OWL/OSCAR addressing mode string was not recognized.
    #[error("unknown OWL mode '{0}'")]
    UnknownOwlMode(String),

    /// A required configuration value was not supplied.
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Step sizes violate the Condat-Vu convergence condition
    /// `1/tau - sigma*||T||^2 >= L/2`.
    #[error("tau/sigma violate the convergence condition ({lhs:.3e} < {rhs:.3e})")]
    StepSizeCondition { lhs: f64, rhs: f64 },

    /// Data shape does not match the configured operator domain.
    #[error("data shape {data:?} does not match expected shape {expected:?}")]
    ShapeMismatch {
        data: Vec<usize>,
        expected: Vec<usize>,
    },

    /// Patch shape and overlap factor do not tile the image.
    #[error("patch shape {patch:?} does not tile image {image:?} with overlap factor {overlap}")]
    PatchTiling {
        patch: (usize, usize),
        image: (usize, usize),
        overlap: usize,
    },

    /// A capability was invoked that this operator does not implement.
    /// Distinguishable from numerical failure by construction.
    #[error("'{0}' is not implemented for this operator")]
    Unimplemented(&'static str),

    #[error(transparent)]
    Reshape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}
