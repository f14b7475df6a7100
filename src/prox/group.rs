//! Group-lasso penalties over the channel axis.

use ndarray::prelude::*;
use num_complex::Complex64 as c64;

use super::{Proximity, SparseThreshold};
use crate::error::Error;
use crate::utils::shrink_factor;

/// Group-lasso proximity operator on `(channels, coeffs)` data: each
/// coefficient group (one column, all channels) is scaled by
/// `max(0, 1 - w/max(||group||_2, eps))`.
pub struct GroupLasso {
    weights: f64,
}

impl GroupLasso {
    pub fn new(weights: f64) -> Self {
        GroupLasso { weights }
    }
}

impl Proximity<Ix2> for GroupLasso {
    fn op(&self, data: ArrayView2<'_, c64>, extra_factor: f64) -> Result<Array2<c64>, Error> {
        let threshold = self.weights * extra_factor;
        let mut out = data.to_owned();
        for mut group in out.columns_mut() {
            let norm2 = group.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
            let factor = shrink_factor(norm2, threshold);
            group.mapv_inplace(|v| v * factor);
        }
        Ok(out)
    }

    /// Sum of per-group L2 norms.
    fn cost(&self, data: ArrayView2<'_, c64>) -> Result<f64, Error> {
        Ok(data
            .columns()
            .into_iter()
            .map(|g| g.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt())
            .sum())
    }
}

/// Sparse-group-lasso: soft threshold first, then group-lasso, both scaled
/// by the same `extra_factor`. The cost is the sum of both penalties
/// evaluated independently on the input.
pub struct SparseGroupLasso {
    prox_l1: SparseThreshold<Ix2>,
    prox_l2: GroupLasso,
}

impl SparseGroupLasso {
    pub fn new(weights_l1: f64, weights_l2: f64) -> Self {
        SparseGroupLasso {
            prox_l1: SparseThreshold::scalar(weights_l1),
            prox_l2: GroupLasso::new(weights_l2),
        }
    }
}

impl Proximity<Ix2> for SparseGroupLasso {
    fn op(&self, data: ArrayView2<'_, c64>, extra_factor: f64) -> Result<Array2<c64>, Error> {
        let soft = self.prox_l1.op(data, extra_factor)?;
        self.prox_l2.op(soft.view(), extra_factor)
    }

    fn cost(&self, data: ArrayView2<'_, c64>) -> Result<f64, Error> {
        Ok(self.prox_l1.cost(data)? + self.prox_l2.cost(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::l2_norm;

    fn ones(rows: usize, cols: usize) -> Array2<c64> {
        Array2::from_elem((rows, cols), c64::new(1.0, 0.0))
    }

    fn test_data() -> Array2<c64> {
        Array2::from_shape_fn((3, 4), |(i, j)| {
            c64::new((i + j) as f64 / 2.0, i as f64 - 0.4 * j as f64)
        })
    }

    #[test]
    fn cost_of_ones_is_groups_times_sqrt_channels() {
        let prox = GroupLasso::new(1.0);
        let cost = prox.cost(ones(3, 4).view()).unwrap();
        assert!((cost - 4.0 * 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn zero_threshold_is_identity() {
        let prox = GroupLasso::new(0.9);
        let data = test_data();
        assert_eq!(prox.op(data.view(), 0.0).unwrap(), data);
    }

    #[test]
    fn kills_groups_below_the_threshold() {
        let prox = GroupLasso::new(2.0);
        // each column has norm sqrt(3) < 2
        let out = prox.op(ones(3, 4).view(), 1.0).unwrap();
        assert!(out.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn non_expansive() {
        let prox = GroupLasso::new(0.6);
        let a = test_data();
        let b = test_data().mapv(|v| v * c64::new(-0.7, 0.2));
        let da = prox.op(a.view(), 1.0).unwrap() - prox.op(b.view(), 1.0).unwrap();
        assert!(l2_norm(da.view()) <= l2_norm((&a - &b).view()) + 1e-12);
    }

    #[test]
    fn sparse_group_lasso_composes_and_sums_costs() {
        let prox = SparseGroupLasso::new(0.5, 0.5);
        let data = ones(3, 4);
        assert_eq!(prox.op(data.view(), 0.0).unwrap(), data);
        let expected = 0.5 * 12.0 + 4.0 * 3f64.sqrt();
        assert!((prox.cost(data.view()).unwrap() - expected).abs() < 1e-12);
    }
}
