//! Ordered-weighted-L1 (OWL/OSCAR) proximity operator.

use std::str::FromStr;

use ndarray::prelude::*;
use num_complex::Complex64 as c64;

use super::Proximity;
use crate::error::Error;
use crate::linear::BandShape;

/// Addressing mode for the per-vector OWL pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwlMode {
    /// One global pass over the flattened data.
    All,
    /// Independent pass per wavelet band, channels included.
    BandBased,
    /// Independent pass per coefficient column, sharing one weight vector.
    CoeffBased,
}

impl FromStr for OwlMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "all" => Ok(OwlMode::All),
            "band_based" => Ok(OwlMode::BandBased),
            "coeff_based" => Ok(OwlMode::CoeffBased),
            other => Err(Error::UnknownOwlMode(other.to_string())),
        }
    }
}

/// OSCAR weight vector: `w[i] = alpha + beta * (n - 1 - i)`, descending.
pub fn oscar_weights(alpha: f64, beta: f64, n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| alpha + beta * (n - 1 - i) as f64)
}

// Pool-adjacent-violators fit of a non-decreasing sequence.
fn pava_non_decreasing(v: &[f64]) -> Vec<f64> {
    // (mean, count) blocks
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(v.len());
    for &x in v {
        blocks.push((x, 1));
        while blocks.len() > 1 {
            let (m2, c2) = blocks[blocks.len() - 1];
            let (m1, c1) = blocks[blocks.len() - 2];
            if m1 <= m2 {
                break;
            }
            blocks.pop();
            blocks.pop();
            let c = c1 + c2;
            blocks.push(((m1 * c1 as f64 + m2 * c2 as f64) / c as f64, c));
        }
    }
    let mut out = Vec::with_capacity(v.len());
    for (m, c) in blocks {
        out.extend(std::iter::repeat(m).take(c));
    }
    out
}

// Projection onto the monotone non-negative non-increasing cone.
fn isotonic_non_increasing(v: &[f64]) -> Vec<f64> {
    let reversed: Vec<f64> = v.iter().rev().cloned().collect();
    let fitted = pava_non_decreasing(&reversed);
    fitted.into_iter().rev().map(|x| x.max(0.0)).collect()
}

enum OwlWeights {
    Uniform(f64),
    All(Array1<f64>),
    PerBand(Vec<Array1<f64>>),
    PerCoeff(Array1<f64>),
}

/// Proximity operator of the ordered-weighted-L1 norm.
///
/// Supplying a pairwise-clustering parameter `beta` switches to OSCAR
/// weight generation; otherwise `alpha` is used as a uniform threshold.
pub struct Owl {
    mode: OwlMode,
    weights: OwlWeights,
    band_shapes: Option<Vec<BandShape>>,
    n_channel: usize,
}

impl Owl {
    /// `n_coeffs` is the per-channel coefficient count, used by the `All`
    /// mode; `band_shapes` is required by the `BandBased` mode.
    pub fn new(
        alpha: f64,
        beta: Option<f64>,
        n_coeffs: usize,
        band_shapes: Option<Vec<BandShape>>,
        mode: OwlMode,
        n_channel: usize,
    ) -> Result<Self, Error> {
        if mode == OwlMode::BandBased && band_shapes.is_none() {
            return Err(Error::MissingConfig("band shapes for band_based OWL"));
        }
        let weights = match beta {
            None => OwlWeights::Uniform(alpha),
            Some(beta) => {
                log::debug!("using OSCAR weight generation");
                match mode {
                    OwlMode::All => OwlWeights::All(oscar_weights(
                        alpha,
                        beta,
                        n_coeffs * n_channel,
                    )),
                    OwlMode::BandBased => {
                        let shapes = band_shapes
                            .as_ref()
                            .ok_or(Error::MissingConfig("band shapes for band_based OWL"))?;
                        OwlWeights::PerBand(
                            shapes
                                .iter()
                                .map(|&(h, w)| oscar_weights(alpha, beta, n_channel * h * w))
                                .collect(),
                        )
                    }
                    OwlMode::CoeffBased => {
                        OwlWeights::PerCoeff(oscar_weights(alpha, beta, n_channel))
                    }
                }
            }
        };
        Ok(Owl {
            mode,
            weights,
            band_shapes,
            n_channel,
        })
    }

    // Sorted-threshold pass on one flat vector: sort by descending
    // magnitude, subtract the weight vector, project onto the monotone
    // non-negative non-increasing cone, undo the sort, restore phases.
    fn prox_owl(data: &[c64], weights: Option<&Array1<f64>>, uniform: f64, extra: f64) -> Vec<c64> {
        let n = data.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_unstable_by(|&a, &b| {
            data[b]
                .norm()
                .partial_cmp(&data[a].norm())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let shifted: Vec<f64> = order
            .iter()
            .enumerate()
            .map(|(rank, &i)| {
                let w = weights.map_or(uniform, |wv| wv[rank]);
                data[i].norm() - w * extra
            })
            .collect();
        let fitted = isotonic_non_increasing(&shifted);
        let mut out = vec![c64::new(0.0, 0.0); n];
        for (rank, &i) in order.iter().enumerate() {
            let mag = data[i].norm();
            let phase = if mag > f64::EPSILON {
                data[i] / mag
            } else {
                c64::new(0.0, 0.0)
            };
            out[i] = phase * fitted[rank];
        }
        out
    }

    fn band_weights(&self, band: usize) -> (Option<&Array1<f64>>, f64) {
        match &self.weights {
            OwlWeights::Uniform(w) => (None, *w),
            OwlWeights::PerBand(ws) => (Some(&ws[band]), 0.0),
            OwlWeights::All(w) | OwlWeights::PerCoeff(w) => (Some(w), 0.0),
        }
    }
}

impl Proximity<Ix2> for Owl {
    fn op(&self, data: ArrayView2<'_, c64>, extra_factor: f64) -> Result<Array2<c64>, Error> {
        let (channels, n_coeffs) = data.dim();
        if channels != self.n_channel {
            return Err(Error::ShapeMismatch {
                data: vec![channels, n_coeffs],
                expected: vec![self.n_channel, n_coeffs],
            });
        }
        match self.mode {
            OwlMode::All => {
                let flat: Vec<c64> = data.iter().cloned().collect();
                let (weights, uniform) = self.band_weights(0);
                let out = Self::prox_owl(&flat, weights, uniform, extra_factor);
                Ok(Array1::from(out).into_shape((channels, n_coeffs))?)
            }
            OwlMode::BandBased => {
                let shapes = self
                    .band_shapes
                    .as_ref()
                    .ok_or(Error::MissingConfig("band shapes for band_based OWL"))?;
                let mut out = Array2::zeros(data.raw_dim());
                let mut start = 0;
                for (band, &(h, w)) in shapes.iter().enumerate() {
                    let stop = start + h * w;
                    let chunk: Vec<c64> =
                        data.slice(s![.., start..stop]).iter().cloned().collect();
                    let (weights, uniform) = self.band_weights(band);
                    let shrunk = Self::prox_owl(&chunk, weights, uniform, extra_factor);
                    let folded = Array1::from(shrunk).into_shape((channels, stop - start))?;
                    out.slice_mut(s![.., start..stop]).assign(&folded);
                    start = stop;
                }
                Ok(out)
            }
            OwlMode::CoeffBased => {
                let mut out = Array2::zeros(data.raw_dim());
                for j in 0..n_coeffs {
                    let column: Vec<c64> = data.column(j).iter().cloned().collect();
                    let (weights, uniform) = self.band_weights(0);
                    let shrunk = Self::prox_owl(&column, weights, uniform, extra_factor);
                    for (l, v) in shrunk.into_iter().enumerate() {
                        out[[l, j]] = v;
                    }
                }
                Ok(out)
            }
        }
    }

    /// Cost accounting for OWL is not implemented upstream; a placeholder
    /// zero is returned with a warning so the gap is visible but non-fatal.
    fn cost(&self, _data: ArrayView2<'_, c64>) -> Result<f64, Error> {
        log::warn!("OWL cost function not implemented, returning 0");
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oscar_weights_descend() {
        let w = oscar_weights(1.0, 0.5, 4);
        assert_eq!(w, array![2.5, 2.0, 1.5, 1.0]);
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        assert!(matches!(
            "banded".parse::<OwlMode>(),
            Err(Error::UnknownOwlMode(_))
        ));
        assert_eq!("band_based".parse::<OwlMode>().unwrap(), OwlMode::BandBased);
    }

    #[test]
    fn isotonic_projection_is_non_increasing() {
        let fitted = isotonic_non_increasing(&[3.0, 4.0, 1.0, 2.0, -1.0]);
        for pair in fitted.windows(2) {
            assert!(pair[0] >= pair[1] - 1e-12);
        }
        assert!(fitted.iter().all(|&v| v >= 0.0));
    }

    fn test_data() -> Array2<c64> {
        array![[
            c64::new(3.0, 4.0),
            c64::new(0.3, 0.0),
            c64::new(0.0, -2.0),
            c64::new(-1.0, 0.0),
        ]]
    }

    #[test]
    fn uniform_threshold_soft_thresholds_in_order() {
        let prox = Owl::new(1.0, None, 4, None, OwlMode::All, 1).unwrap();
        let data = test_data();
        let out = prox.op(data.view(), 1.0).unwrap();

        // magnitudes, resorted descending, stay non-increasing and sit at
        // max(|x|_sorted - t, 0)
        let mut in_mags: Vec<f64> = data.iter().map(|v| v.norm()).collect();
        in_mags.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let mut out_mags: Vec<f64> = out.iter().map(|v| v.norm()).collect();
        out_mags.sort_by(|a, b| b.partial_cmp(a).unwrap());
        for (o, i) in out_mags.iter().zip(&in_mags) {
            assert!((o - (i - 1.0).max(0.0)).abs() < 1e-12);
        }
        for pair in out_mags.windows(2) {
            assert!(pair[0] >= pair[1] - 1e-12);
        }

        // phases preserved on surviving entries
        for (o, i) in out.iter().zip(data.iter()) {
            if o.norm() > 0.0 {
                assert!((o.arg() - i.arg()).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn zero_extra_factor_is_identity() {
        let prox = Owl::new(
            1.0,
            Some(0.5),
            4,
            None,
            OwlMode::All,
            1,
        )
        .unwrap();
        let data = test_data();
        let out = prox.op(data.view(), 0.0).unwrap();
        for (o, i) in out.iter().zip(data.iter()) {
            assert!((o - i).norm() < 1e-12);
        }
    }

    #[test]
    fn band_based_requires_band_shapes() {
        assert!(matches!(
            Owl::new(1.0, Some(0.1), 8, None, OwlMode::BandBased, 2),
            Err(Error::MissingConfig(_))
        ));
    }

    #[test]
    fn coeff_based_shrinks_each_column_independently() {
        let prox = Owl::new(0.5, None, 3, None, OwlMode::CoeffBased, 2).unwrap();
        let data = array![
            [c64::new(2.0, 0.0), c64::new(0.1, 0.0), c64::new(1.0, 0.0)],
            [c64::new(0.0, 1.0), c64::new(0.2, 0.0), c64::new(0.0, 0.0)],
        ];
        let out = prox.op(data.view(), 1.0).unwrap();
        assert!((out[[0, 0]].norm() - 1.5).abs() < 1e-12);
        // column of small entries collapses
        assert!(out[[0, 1]].norm() < 1e-12);
        assert!(out[[1, 1]].norm() < 1e-12);
    }

    #[test]
    fn cost_is_a_warned_placeholder() {
        let prox = Owl::new(1.0, None, 4, None, OwlMode::All, 1).unwrap();
        assert_eq!(prox.cost(test_data().view()).unwrap(), 0.0);
    }
}
