//! Patch-based nuclear-norm (low-rank) proximity operators.

use ndarray::prelude::*;
use ndarray_linalg::{JobSvd, SVDDC};
use num_complex::Complex64 as c64;
use rayon::prelude::*;

use super::Proximity;
use crate::error::Error;
use crate::linear::CoeffsManifest;
use crate::patch::{extract_patches, reconstruct_patches};
use crate::utils::shrink_factor;

/// Per-scale parameter: one value broadcast over all bands, or one value
/// per band.
#[derive(Clone, Debug)]
pub enum ScaleParam<T> {
    Global(T),
    PerScale(Vec<T>),
}

impl<T: Clone> ScaleParam<T> {
    fn resolve(&self, nb_bands: usize) -> Vec<T> {
        match self {
            ScaleParam::Global(v) => vec![v.clone(); nb_bands],
            ScaleParam::PerScale(vs) => vs.clone(),
        }
    }
}

// Shrink the singular values of one (pixels x channels) patch matrix.
fn prox_nuclear(
    patch: ArrayView3<'_, c64>,
    threshold: f64,
) -> Result<Array3<c64>, Error> {
    let (ph, pw, channels) = patch.dim();
    let mat = patch
        .as_standard_layout()
        .into_owned()
        .into_shape((ph * pw, channels))?;
    let (u, mut s, vt) = mat.svddc(JobSvd::Some)?;
    let u = u.ok_or(Error::Unimplemented("svd left vectors"))?;
    let vt = vt.ok_or(Error::Unimplemented("svd right vectors"))?;
    s.mapv_inplace(|sv| sv * shrink_factor(sv, threshold));
    let s_c = s.mapv(|sv| c64::new(sv, 0.0));
    let shrunk = (&u * &s_c).dot(&vt);
    Ok(shrunk.into_shape((ph, pw, channels))?)
}

fn nuclear_cost(patch: ArrayView3<'_, c64>) -> Result<f64, Error> {
    let (ph, pw, channels) = patch.dim();
    let mat = patch
        .as_standard_layout()
        .into_owned()
        .into_shape((ph * pw, channels))?;
    let (_, s, _) = mat.svddc(JobSvd::None)?;
    Ok(s.sum())
}

/// Nuclear-norm proximity operator on a channel-stacked image
/// `(channels, h, w)`: partitions the image into patches, shrinks each
/// patch's singular values, and stitches the result back.
///
/// Patches are independent; with `num_cores > 1` they are dispatched over a
/// worker pool, with output placement fixed by patch index so the result is
/// identical to the sequential order.
pub struct NuclearNorm {
    weights: f64,
    patch_shape: (usize, usize),
    overlapping_factor: usize,
    num_cores: usize,
}

impl NuclearNorm {
    pub fn new(
        weights: f64,
        patch_shape: (usize, usize),
        overlapping_factor: usize,
        num_cores: usize,
    ) -> Result<Self, Error> {
        if overlapping_factor == 0
            || patch_shape.0 % overlapping_factor != 0
            || patch_shape.1 % overlapping_factor != 0
        {
            return Err(Error::PatchTiling {
                patch: patch_shape,
                image: (0, 0),
                overlap: overlapping_factor,
            });
        }
        if overlapping_factor == 1 {
            log::debug!("patches don't overlap");
        }
        Ok(NuclearNorm {
            weights,
            patch_shape,
            overlapping_factor,
            num_cores: num_cores.max(1),
        })
    }

    // Channel-last view of the stacked image, standard layout.
    fn channel_last(data: ArrayView3<'_, c64>) -> Array3<c64> {
        data.view()
            .permuted_axes([1, 2, 0])
            .as_standard_layout()
            .into_owned()
    }

    fn channel_first(data: Array3<c64>) -> Array3<c64> {
        data.permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned()
    }

    fn map_patches(
        &self,
        patches: Vec<Array3<c64>>,
        threshold: f64,
    ) -> Result<Vec<Array3<c64>>, Error> {
        if self.num_cores > 1 {
            patches
                .par_iter()
                .map(|p| prox_nuclear(p.view(), threshold))
                .collect()
        } else {
            patches
                .iter()
                .map(|p| prox_nuclear(p.view(), threshold))
                .collect()
        }
    }
}

impl Proximity<Ix3> for NuclearNorm {
    fn op(&self, data: ArrayView3<'_, c64>, extra_factor: f64) -> Result<Array3<c64>, Error> {
        let threshold = self.weights * extra_factor;
        let (channels, h, w) = data.dim();
        let images = Self::channel_last(data);
        if (h, w) == self.patch_shape {
            // The whole array is a single patch.
            return Ok(Self::channel_first(prox_nuclear(images.view(), threshold)?));
        }
        let patches = extract_patches(images.view(), self.patch_shape, self.overlapping_factor)?;
        let processed = self.map_patches(patches, threshold)?;
        let stitched = reconstruct_patches(
            &processed,
            (h, w, channels),
            self.patch_shape,
            self.overlapping_factor,
        )?;
        Ok(Self::channel_first(stitched))
    }

    /// Sum of the nuclear norms of all patches, scaled by the weight.
    fn cost(&self, data: ArrayView3<'_, c64>) -> Result<f64, Error> {
        let (_, h, w) = data.dim();
        let images = Self::channel_last(data);
        let cost = if (h, w) == self.patch_shape {
            nuclear_cost(images.view())?
        } else {
            let patches =
                extract_patches(images.view(), self.patch_shape, self.overlapping_factor)?;
            let costs: Result<Vec<f64>, Error> = if self.num_cores > 1 {
                patches.par_iter().map(|p| nuclear_cost(p.view())).collect()
            } else {
                patches.iter().map(|p| nuclear_cost(p.view())).collect()
            };
            costs?.into_iter().sum()
        };
        Ok(cost * self.weights)
    }
}

/// Nuclear-norm applied independently per wavelet band of stacked
/// multichannel coefficients `(channels, coeffs)`.
///
/// Weights and patch shapes may be given per band or broadcast from a
/// single value; when both are lists their lengths must match. Band
/// boundaries come from the transform's shape manifest.
pub struct MultiLevelNuclearNorm {
    per_band: Vec<NuclearNorm>,
    manifest: CoeffsManifest,
}

impl MultiLevelNuclearNorm {
    pub fn new(
        weights: ScaleParam<f64>,
        patch_shape: ScaleParam<(usize, usize)>,
        manifest: &CoeffsManifest,
        overlapping_factor: usize,
        num_cores: usize,
    ) -> Result<Self, Error> {
        let nb_bands = manifest.nb_bands();
        if let (ScaleParam::PerScale(w), ScaleParam::PerScale(p)) = (&weights, &patch_shape) {
            if w.len() != p.len() {
                return Err(Error::ScaleListMismatch {
                    weights: w.len(),
                    patches: p.len(),
                });
            }
        }
        let weights = weights.resolve(nb_bands);
        let shapes = patch_shape.resolve(nb_bands);
        if weights.len() != nb_bands || shapes.len() != nb_bands {
            return Err(Error::ScaleListMismatch {
                weights: weights.len(),
                patches: shapes.len(),
            });
        }
        let per_band = weights
            .into_iter()
            .zip(shapes)
            .map(|(w, p)| NuclearNorm::new(w, p, overlapping_factor, num_cores))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(MultiLevelNuclearNorm {
            per_band,
            manifest: manifest.clone(),
        })
    }

    fn band_stack(
        &self,
        data: ArrayView2<'_, c64>,
        range: std::ops::Range<usize>,
        shape: (usize, usize),
    ) -> Result<Array3<c64>, Error> {
        let channels = data.dim().0;
        data.slice(s![.., range])
            .as_standard_layout()
            .into_owned()
            .into_shape((channels, shape.0, shape.1))
            .map_err(Error::from)
    }

    fn check_width(&self, data: ArrayView2<'_, c64>) -> Result<(), Error> {
        if data.dim().1 != self.manifest.nb_coeffs() {
            return Err(Error::ShapeMismatch {
                data: vec![data.dim().0, data.dim().1],
                expected: vec![data.dim().0, self.manifest.nb_coeffs()],
            });
        }
        Ok(())
    }
}

impl Proximity<Ix2> for MultiLevelNuclearNorm {
    fn op(&self, data: ArrayView2<'_, c64>, extra_factor: f64) -> Result<Array2<c64>, Error> {
        self.check_width(data)?;
        let channels = data.dim().0;
        let mut out = Array2::zeros(data.raw_dim());
        for ((range, shape), prox) in self
            .manifest
            .band_ranges()
            .into_iter()
            .zip(&self.per_band)
        {
            let stack = self.band_stack(data, range.clone(), shape)?;
            let shrunk = prox.op(stack.view(), extra_factor)?;
            let flat = shrunk
                .as_standard_layout()
                .into_owned()
                .into_shape((channels, shape.0 * shape.1))?;
            out.slice_mut(s![.., range]).assign(&flat);
        }
        Ok(out)
    }

    fn cost(&self, data: ArrayView2<'_, c64>) -> Result<f64, Error> {
        self.check_width(data)?;
        let mut cost = 0.0;
        for ((range, shape), prox) in self
            .manifest
            .band_ranges()
            .into_iter()
            .zip(&self.per_band)
        {
            let stack = self.band_stack(data, range, shape)?;
            cost += prox.cost(stack.view())?;
        }
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::WaveletAdapter;
    use crate::utils::l2_norm;

    fn test_stack(c: usize, h: usize, w: usize) -> Array3<c64> {
        Array3::from_shape_fn((c, h, w), |(l, i, j)| {
            c64::new(
                ((l + 1) * (i + 2 * j + 1)) as f64 / 7.0,
                (i as f64 - j as f64) / 5.0,
            )
        })
    }

    #[test]
    fn zero_threshold_is_identity() {
        let prox = NuclearNorm::new(1.0, (4, 4), 1, 1).unwrap();
        let data = test_stack(2, 4, 4);
        let out = prox.op(data.view(), 0.0).unwrap();
        assert!(l2_norm((&out - &data).view()) < 1e-10);
    }

    #[test]
    fn disjoint_round_trip_with_unshrunk_values() {
        let prox = NuclearNorm::new(0.0, (2, 2), 1, 1).unwrap();
        let data = test_stack(3, 4, 6);
        let out = prox.op(data.view(), 1.0).unwrap();
        assert!(l2_norm((&out - &data).view()) < 1e-10);
    }

    #[test]
    fn small_singular_values_collapse_to_zero() {
        // all singular values are below the threshold
        let data = test_stack(2, 4, 4).mapv(|v| v * 0.01);
        let prox = NuclearNorm::new(10.0, (4, 4), 1, 1).unwrap();
        let out = prox.op(data.view(), 1.0).unwrap();
        assert!(l2_norm(out.view()) < 1e-12);
    }

    #[test]
    fn parallel_dispatch_matches_sequential() {
        let data = test_stack(2, 4, 8);
        let seq = NuclearNorm::new(0.3, (2, 2), 1, 1).unwrap();
        let par = NuclearNorm::new(0.3, (2, 2), 1, 4).unwrap();
        let a = seq.op(data.view(), 1.0).unwrap();
        let b = par.op(data.view(), 1.0).unwrap();
        assert!(l2_norm((&a - &b).view()) < 1e-12);
    }

    #[test]
    fn cost_scales_with_weights() {
        let data = test_stack(2, 4, 4);
        let unit = NuclearNorm::new(1.0, (4, 4), 1, 1).unwrap();
        let double = NuclearNorm::new(2.0, (4, 4), 1, 1).unwrap();
        let a = unit.cost(data.view()).unwrap();
        let b = double.cost(data.view()).unwrap();
        assert!((b - 2.0 * a).abs() < 1e-10);
        assert!(a > 0.0);
    }

    #[test]
    fn multi_level_round_trips_at_zero_weight() {
        let adapter = WaveletAdapter::new("haar", 1).unwrap();
        let stack = test_stack(2, 4, 4);
        let (coeffs, manifest) = adapter.op_multichannel(stack.view()).unwrap();
        let prox = MultiLevelNuclearNorm::new(
            ScaleParam::Global(0.0),
            ScaleParam::Global((2, 2)),
            &manifest,
            1,
            1,
        )
        .unwrap();
        let out = prox.op(coeffs.view(), 1.0).unwrap();
        assert!(l2_norm((&out - &coeffs).view()) < 1e-10);
    }

    #[test]
    fn mismatched_per_scale_lists_fail() {
        let adapter = WaveletAdapter::new("haar", 1).unwrap();
        let (_, manifest) = adapter
            .op(Array2::zeros((4, 4)).view())
            .unwrap();
        let result = MultiLevelNuclearNorm::new(
            ScaleParam::PerScale(vec![1.0, 2.0]),
            ScaleParam::PerScale(vec![(2, 2); 3]),
            &manifest,
            1,
            1,
        );
        assert!(matches!(result, Err(Error::ScaleListMismatch { .. })));
    }

    #[test]
    fn per_scale_length_must_match_bands() {
        let adapter = WaveletAdapter::new("haar", 1).unwrap();
        let (_, manifest) = adapter
            .op(Array2::zeros((4, 4)).view())
            .unwrap();
        // manifest has 4 bands; 2 weights is a configuration error
        let result = MultiLevelNuclearNorm::new(
            ScaleParam::PerScale(vec![1.0, 2.0]),
            ScaleParam::Global((2, 2)),
            &manifest,
            1,
            1,
        );
        assert!(result.is_err());
    }
}
