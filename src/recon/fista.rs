//! Fast Iterative Shrinking/Thresholding Algorithm

use ndarray::prelude::*;
use ndarray::Dimension;
use num_complex::Complex64 as c64;

use super::{converged, ReconOutcome};
use crate::error::Error;
use crate::fourier::FourierOperator;
use crate::grad::{GradOperator, GradSynthesis};
use crate::prox::Proximity;

/// FISTA controls.
#[derive(Clone, Debug)]
pub struct FistaOpts {
    pub max_nb_of_iter: usize,
    /// Relative cost-change tolerance for early stopping; only consulted
    /// when cost tracking is enabled.
    pub atol: f64,
    /// Gradient step size; defaults to the operator's `inv_spec_rad`.
    pub step: Option<f64>,
    pub track_cost: bool,
}

impl Default for FistaOpts {
    fn default() -> Self {
        FistaOpts {
            max_nb_of_iter: 150,
            atol: 1e-4,
            step: None,
            track_cost: true,
        }
    }
}

/// Final FISTA state over an arbitrary variable domain.
pub struct FistaOutcome<D: Dimension> {
    pub x: Array<c64, D>,
    pub cost: Vec<f64>,
}

/// Accelerated proximal-gradient iteration.
///
/// Per iteration: gradient step at the momentum iterate `z`, proximal step
/// with the step size folded into the threshold, then the standard momentum
/// update `t_{k+1} = (1 + sqrt(1 + 4 t_k^2))/2`,
/// `z = x_k + ((t_k - 1)/t_{k+1}) (x_k - x_{k-1})`.
pub fn fista<G, P>(
    grad: &G,
    prox: &P,
    x0: Array<c64, G::Dom>,
    opts: &FistaOpts,
) -> Result<FistaOutcome<G::Dom>, Error>
where
    G: GradOperator,
    P: Proximity<G::Dom>,
{
    let step = opts.step.unwrap_or_else(|| grad.inv_spec_rad());
    let mut x = x0.clone();
    let mut z = x0;
    let mut t = 1.0f64;
    let mut cost = Vec::new();

    if opts.track_cost {
        cost.push(grad.fidelity_cost(x.view())? + prox.cost(x.view())?);
    }
    for iter in 1..=opts.max_nb_of_iter {
        let x_old = x.clone();

        let g = grad.gradient(z.view())?;
        let mut v = z;
        v.zip_mut_with(&g, |vi, gi| *vi -= *gi * step);
        x = prox.op(v.view(), step)?;

        let t_new = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let beta = (t - 1.0) / t_new;
        z = &x + &((&x - &x_old).mapv(|d| d * beta));
        t = t_new;

        if opts.track_cost {
            let c = grad.fidelity_cost(x.view())? + prox.cost(x.view())?;
            log::debug!("fista iter {}: cost {:.6e}", iter, c);
            let stop = converged(cost.last().cloned(), c, opts.atol);
            cost.push(c);
            if stop {
                log::info!("fista converged after {} iterations", iter);
                break;
            }
        }
    }
    Ok(FistaOutcome { x, cost })
}

/// Synthesis-formulation reconstruction driver: runs FISTA on transform
/// coefficients from a zero start and returns the image alongside them.
pub fn sparse_rec_fista<F, P>(
    grad: &GradSynthesis<F>,
    prox: &P,
    opts: &FistaOpts,
) -> Result<ReconOutcome, Error>
where
    F: FourierOperator,
    P: Proximity<Ix1>,
{
    let x0 = Array1::zeros(grad.manifest().nb_coeffs());
    let outcome = fista(grad, prox, x0, opts)?;
    let image = grad.linear().adj_op(outcome.x.view(), grad.manifest())?;
    Ok(ReconOutcome {
        image,
        coeffs: outcome.x,
        cost: outcome.cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourier::CartesianFft2;
    use crate::grad::GradAnalysis;
    use crate::linear::WaveletAdapter;
    use crate::prox::SparseThreshold;
    use crate::utils::l2_norm;

    fn test_image(h: usize, w: usize) -> Array2<c64> {
        Array2::from_shape_fn((h, w), |(i, j)| {
            c64::new(((i * w + j) % 7) as f64 / 3.0, ((i + 2 * j) % 5) as f64 / 4.0)
        })
    }

    #[test]
    fn recovers_fully_sampled_image() {
        let x_true = test_image(4, 4);
        let ft = CartesianFft2::fully_sampled((4, 4));
        let y = ft.op(x_true.view()).unwrap();
        let grad = GradAnalysis::new(y, ft).unwrap();
        let prox = SparseThreshold::scalar(0.0);
        let opts = FistaOpts {
            max_nb_of_iter: 50,
            atol: 0.0,
            step: None,
            track_cost: false,
        };
        let out = fista(&grad, &prox, Array2::zeros((4, 4)), &opts).unwrap();
        let rel = l2_norm((&out.x - &x_true).view()) / l2_norm(x_true.view());
        assert!(rel < 1e-6, "relative error {}", rel);
    }

    #[test]
    fn fidelity_cost_decreases_monotonically_without_regularization() {
        let x_true = test_image(8, 8);
        let mut mask = Array2::from_elem((8, 8), false);
        for (idx, m) in mask.iter_mut().enumerate() {
            // fixed 50%-density sampling pattern
            *m = idx % 2 == 0;
        }
        let ft = CartesianFft2::new(mask);
        let y = ft.op(x_true.view()).unwrap();
        let grad = GradAnalysis::new(y, ft).unwrap();
        let prox = SparseThreshold::scalar(0.0);
        let opts = FistaOpts {
            max_nb_of_iter: 30,
            atol: 0.0,
            step: Some(1.0),
            track_cost: true,
        };
        let out = fista(&grad, &prox, Array2::zeros((8, 8)), &opts).unwrap();
        assert!(out.cost.len() > 2);
        for pair in out.cost.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12);
        }
    }

    #[test]
    fn early_stops_on_flat_cost() {
        let x_true = test_image(4, 4);
        let ft = CartesianFft2::fully_sampled((4, 4));
        let y = ft.op(x_true.view()).unwrap();
        let grad = GradAnalysis::new(y, ft).unwrap();
        let prox = SparseThreshold::scalar(0.0);
        let opts = FistaOpts {
            max_nb_of_iter: 500,
            atol: 1e-10,
            step: None,
            track_cost: true,
        };
        let out = fista(&grad, &prox, Array2::zeros((4, 4)), &opts).unwrap();
        assert!(out.cost.len() < 500);
    }

    #[test]
    fn synthesis_driver_returns_image_and_coefficients() {
        let x_true = test_image(8, 8);
        let ft = CartesianFft2::fully_sampled((8, 8));
        let y = ft.op(x_true.view()).unwrap();
        let linear = WaveletAdapter::new("haar", 2).unwrap();
        let grad = GradSynthesis::new(y, ft, linear).unwrap();
        let prox = SparseThreshold::scalar(0.0);
        let opts = FistaOpts {
            max_nb_of_iter: 60,
            atol: 0.0,
            step: None,
            track_cost: true,
        };
        let out = sparse_rec_fista(&grad, &prox, &opts).unwrap();
        let rel = l2_norm((&out.image - &x_true).view()) / l2_norm(x_true.view());
        assert!(rel < 1e-6, "relative error {}", rel);
        let back = grad
            .linear()
            .adj_op(out.coeffs.view(), grad.manifest())
            .unwrap();
        assert!(l2_norm((&back - &out.image).view()) < 1e-12);
    }
}
