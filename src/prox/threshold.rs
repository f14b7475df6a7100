//! Elementwise soft thresholding of complex coefficients.

use ndarray::prelude::*;
use ndarray::Dimension;
use num_complex::Complex64 as c64;

use super::Proximity;
use crate::error::Error;
use crate::utils::shrink_factor;

/// Regularization weights: one scalar for all entries or a per-entry map.
#[derive(Clone, Debug)]
pub enum Weights<D: Dimension> {
    Scalar(f64),
    Map(Array<f64, D>),
}

impl<D: Dimension> Weights<D> {
    fn check(&self, shape: &[usize]) -> Result<(), Error> {
        if let Weights::Map(map) = self {
            if map.shape() != shape {
                return Err(Error::ShapeMismatch {
                    data: map.shape().to_vec(),
                    expected: shape.to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// Soft-thresholding operator: shrinks each entry's magnitude by the
/// (scaled) weight, preserving its phase.
pub struct SparseThreshold<D: Dimension> {
    weights: Weights<D>,
}

impl<D: Dimension> SparseThreshold<D> {
    pub fn new(weights: Weights<D>) -> Self {
        SparseThreshold { weights }
    }

    pub fn scalar(weight: f64) -> Self {
        SparseThreshold {
            weights: Weights::Scalar(weight),
        }
    }

    pub fn weights(&self) -> &Weights<D> {
        &self.weights
    }
}

impl<D: Dimension> Proximity<D> for SparseThreshold<D> {
    fn op(&self, data: ArrayView<'_, c64, D>, extra_factor: f64) -> Result<Array<c64, D>, Error> {
        self.weights.check(data.shape())?;
        let mut out = data.to_owned();
        match &self.weights {
            Weights::Scalar(w) => {
                let threshold = w * extra_factor;
                out.mapv_inplace(|v| v * shrink_factor(v.norm(), threshold));
            }
            Weights::Map(map) => {
                out.zip_mut_with(map, |v, &w| {
                    *v = *v * shrink_factor(v.norm(), w * extra_factor);
                });
            }
        }
        Ok(out)
    }

    fn cost(&self, data: ArrayView<'_, c64, D>) -> Result<f64, Error> {
        self.weights.check(data.shape())?;
        Ok(match &self.weights {
            Weights::Scalar(w) => data.iter().map(|v| w * v.norm()).sum(),
            Weights::Map(map) => data
                .iter()
                .zip(map.iter())
                .map(|(v, w)| w * v.norm())
                .sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::l2_norm;

    fn test_data() -> Array1<c64> {
        array![
            c64::new(3.0, 4.0),
            c64::new(-0.5, 0.0),
            c64::new(0.0, 2.0),
            c64::new(0.0, 0.0),
        ]
    }

    #[test]
    fn zero_threshold_is_identity() {
        let prox = SparseThreshold::scalar(0.7);
        let data = test_data();
        assert_eq!(prox.op(data.view(), 0.0).unwrap(), data);
        let zero = SparseThreshold::scalar(0.0);
        assert_eq!(zero.op(data.view(), 1.0).unwrap(), data);
    }

    #[test]
    fn shrinks_magnitude_and_keeps_phase() {
        let prox = SparseThreshold::scalar(1.0);
        let out = prox.op(test_data().view(), 1.0).unwrap();
        // |3+4i| = 5 -> 4, phase untouched
        assert!((out[0].norm() - 4.0).abs() < 1e-12);
        assert!((out[0].arg() - test_data()[0].arg()).abs() < 1e-12);
        // below the threshold collapses to zero
        assert_eq!(out[1], c64::new(0.0, 0.0));
    }

    #[test]
    fn non_expansive() {
        let prox = SparseThreshold::scalar(0.8);
        let a = test_data();
        let b = test_data().mapv(|v| v * c64::new(0.3, -1.2) + c64::new(0.1, 0.0));
        let da = prox.op(a.view(), 1.0).unwrap() - prox.op(b.view(), 1.0).unwrap();
        assert!(l2_norm(da.view()) <= l2_norm((&a - &b).view()) + 1e-12);
    }

    #[test]
    fn per_entry_weights_must_match_shape() {
        let prox = SparseThreshold::new(Weights::Map(Array1::zeros(3)));
        assert!(prox.op(test_data().view(), 1.0).is_err());
    }

    #[test]
    fn per_entry_weights_threshold_entrywise() {
        let prox = SparseThreshold::new(Weights::Map(array![0.0, 1.0, 1.0, 1.0]));
        let out = prox.op(test_data().view(), 1.0).unwrap();
        assert_eq!(out[0], test_data()[0]);
        assert!((out[2].norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cost_is_weighted_l1_of_magnitudes() {
        let prox = SparseThreshold::scalar(2.0);
        let cost = prox.cost(test_data().view()).unwrap();
        assert!((cost - 2.0 * (5.0 + 0.5 + 2.0)).abs() < 1e-12);
    }
}
