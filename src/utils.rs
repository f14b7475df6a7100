//! Shared numeric helpers.

use ndarray::prelude::*;
use ndarray::Dimension;
use num_complex::Complex64 as c64;
use num_traits::Float;

/// L2 norm of a complex array of any dimension.
pub fn l2_norm<D: Dimension>(x: ArrayView<'_, c64, D>) -> f64 {
    x.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt()
}

/// Squared L2 norm of a complex array of any dimension.
pub fn l2_norm_sq<D: Dimension>(x: ArrayView<'_, c64, D>) -> f64 {
    x.iter().map(|v| v.norm_sqr()).sum::<f64>()
}

/// Multiplicative shrinkage factor `max(1 - t/max(m, eps), 0)` shared by the
/// soft-threshold, group-lasso, and singular-value shrinkage formulas.
pub fn shrink_factor<F: Float>(magnitude: F, threshold: F) -> F {
    (F::one() - threshold / magnitude.max(F::epsilon())).max(F::zero())
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Median-absolute-deviation estimate of the noise standard deviation,
/// computed on coefficient magnitudes.
pub fn sigma_mad<D: Dimension>(x: ArrayView<'_, c64, D>) -> f64 {
    let mut mags: Vec<f64> = x.iter().map(|v| v.norm()).collect();
    let med = median(&mut mags);
    let mut devs: Vec<f64> = mags.iter().map(|m| (m - med).abs()).collect();
    median(&mut devs) / 0.6745
}
