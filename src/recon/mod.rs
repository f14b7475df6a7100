//! Iterative reconstruction engines combining a gradient operator with a
//! proximity operator: FISTA (accelerated proximal gradient) and Condat-Vu
//! (primal-dual splitting for analysis-type penalties).

mod fista;
pub use fista::*;

mod condatvu;
pub use condatvu::*;

use ndarray::prelude::*;
use num_complex::Complex64 as c64;

/// Final solver state: reconstructed image, its transform-domain
/// representation, and the recorded cost sequence (empty when tracking is
/// disabled).
pub struct ReconOutcome {
    pub image: Array2<c64>,
    pub coeffs: Array1<c64>,
    pub cost: Vec<f64>,
}

// Relative-change stopping rule shared by both solvers.
pub(crate) fn converged(prev: Option<f64>, current: f64, atol: f64) -> bool {
    match prev {
        Some(p) => (p - current).abs() / p.abs().max(f64::EPSILON) < atol,
        None => false,
    }
}
