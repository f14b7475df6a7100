//! Proximity operators for structured-sparsity and low-rank penalties.
//!
//! Every operator maps data to thresholded data without mutating its input,
//! and is the identity at threshold zero. `extra_factor` scales the
//! configured weight, which is how the solvers fold per-iteration step
//! sizes into the threshold.

mod threshold;
pub use threshold::*;

mod group;
pub use group::*;

mod nuclear;
pub use nuclear::*;

mod owl;
pub use owl::*;

mod ksupport;
pub use ksupport::*;

use ndarray::prelude::*;
use ndarray::Dimension;
use num_complex::Complex64 as c64;

use crate::error::Error;

/// Proximity operator over arrays of dimension `D`.
pub trait Proximity<D: Dimension> {
    /// Apply the operator with the configured weights scaled by
    /// `extra_factor`.
    fn op(&self, data: ArrayView<'_, c64, D>, extra_factor: f64) -> Result<Array<c64, D>, Error>;

    /// Value of the penalty at `data`.
    fn cost(&self, data: ArrayView<'_, c64, D>) -> Result<f64, Error>;
}
