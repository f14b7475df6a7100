//! Sparsifying transforms and the image/coefficient adapter.
//!
//! [`WaveletAdapter`] wraps any [`SparseTransform`] behind a uniform
//! `op`/`adj_op` interface over single- and multichannel data, flattening
//! banded coefficients into one vector and recording a [`CoeffsManifest`]
//! so the flattening can be inverted.

use std::ops::Range;

use ndarray::prelude::*;
use num_complex::Complex64 as c64;

use crate::error::Error;
use crate::utils::l2_norm;

/// Spatial shape of one coefficient band.
pub type BandShape = (usize, usize);

/// Records how to fold a flat coefficient vector back into banded form.
///
/// Produced by the forward call; it is invalid to fold coefficients
/// produced under a different manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoeffsManifest {
    band_shapes: Vec<BandShape>,
}

impl CoeffsManifest {
    pub fn band_shapes(&self) -> &[BandShape] {
        &self.band_shapes
    }

    pub fn nb_bands(&self) -> usize {
        self.band_shapes.len()
    }

    /// Total number of coefficients in the flat layout.
    pub fn nb_coeffs(&self) -> usize {
        self.band_shapes.iter().map(|&(h, w)| h * w).sum()
    }

    /// Flat index range of each band, in band order.
    pub fn band_ranges(&self) -> Vec<(Range<usize>, BandShape)> {
        let mut start = 0;
        self.band_shapes
            .iter()
            .map(|&shape| {
                let len = shape.0 * shape.1;
                let range = start..start + len;
                start += len;
                (range, shape)
            })
            .collect()
    }
}

/// Contract for an external sparsifying transform: a banded analysis /
/// synthesis pair over a single 2D channel.
pub trait SparseTransform {
    /// Decompose an image into coefficient bands, coarse band first.
    fn analysis(&self, image: ArrayView2<'_, c64>) -> Result<Vec<Array2<c64>>, Error>;

    /// Reassemble an image from coefficient bands.
    fn synthesis(&self, bands: &[Array2<c64>]) -> Result<Array2<c64>, Error>;

    /// Number of detail bands produced per decomposition scale.
    fn nb_band_per_scale(&self) -> usize;
}

/// Names accepted by [`load_transform`].
pub fn available_transforms() -> &'static [&'static str] {
    &["identity", "haar"]
}

/// Look up a transform by name. Unknown names fail immediately.
pub fn load_transform(name: &str, nb_scale: usize) -> Result<Box<dyn SparseTransform>, Error> {
    match name {
        "identity" => Ok(Box::new(IdentityTransform)),
        "haar" => Ok(Box::new(HaarTransform::new(nb_scale))),
        other => Err(Error::UnknownTransform(other.to_string())),
    }
}

/// Trivial transform: one band holding the image itself.
pub struct IdentityTransform;

impl SparseTransform for IdentityTransform {
    fn analysis(&self, image: ArrayView2<'_, c64>) -> Result<Vec<Array2<c64>>, Error> {
        Ok(vec![image.to_owned()])
    }

    fn synthesis(&self, bands: &[Array2<c64>]) -> Result<Array2<c64>, Error> {
        if bands.len() != 1 {
            return Err(Error::ShapeMismatch {
                data: vec![bands.len()],
                expected: vec![1],
            });
        }
        Ok(bands[0].clone())
    }

    fn nb_band_per_scale(&self) -> usize {
        1
    }
}

/// Orthonormal multi-scale 2D Haar transform.
///
/// Bands are ordered coarse-to-fine: the final approximation band first,
/// then `(LH, HL, HH)` per scale from coarsest to finest. Being orthonormal,
/// `synthesis` is the exact inverse (and adjoint) of `analysis` and the
/// transform gain is one.
pub struct HaarTransform {
    nb_scale: usize,
}

impl HaarTransform {
    pub fn new(nb_scale: usize) -> Self {
        HaarTransform { nb_scale }
    }

    // Single decomposition step on one channel: (LL, LH, HL, HH).
    fn step(x: ArrayView2<'_, c64>) -> (Array2<c64>, Array2<c64>, Array2<c64>, Array2<c64>) {
        let (h, w) = x.dim();
        let (hh, hw) = (h / 2, w / 2);
        let mut ll = Array2::zeros((hh, hw));
        let mut lh = Array2::zeros((hh, hw));
        let mut hl = Array2::zeros((hh, hw));
        let mut dd = Array2::zeros((hh, hw));
        for i in 0..hh {
            for j in 0..hw {
                let a = x[[2 * i, 2 * j]];
                let b = x[[2 * i, 2 * j + 1]];
                let c = x[[2 * i + 1, 2 * j]];
                let d = x[[2 * i + 1, 2 * j + 1]];
                ll[[i, j]] = (a + b + c + d) * 0.5;
                lh[[i, j]] = (a - b + c - d) * 0.5;
                hl[[i, j]] = (a + b - c - d) * 0.5;
                dd[[i, j]] = (a - b - c + d) * 0.5;
            }
        }
        (ll, lh, hl, dd)
    }

    fn inverse_step(
        ll: &Array2<c64>,
        lh: &Array2<c64>,
        hl: &Array2<c64>,
        dd: &Array2<c64>,
    ) -> Array2<c64> {
        let (hh, hw) = ll.dim();
        let mut x = Array2::zeros((hh * 2, hw * 2));
        for i in 0..hh {
            for j in 0..hw {
                let (s, h, v, d) = (ll[[i, j]], lh[[i, j]], hl[[i, j]], dd[[i, j]]);
                x[[2 * i, 2 * j]] = (s + h + v + d) * 0.5;
                x[[2 * i, 2 * j + 1]] = (s - h + v - d) * 0.5;
                x[[2 * i + 1, 2 * j]] = (s + h - v - d) * 0.5;
                x[[2 * i + 1, 2 * j + 1]] = (s - h - v + d) * 0.5;
            }
        }
        x
    }

    fn check_divisible(&self, shape: (usize, usize)) -> Result<(), Error> {
        let div = 1usize << self.nb_scale;
        if shape.0 % div != 0 || shape.1 % div != 0 || shape.0 == 0 || shape.1 == 0 {
            return Err(Error::ShapeMismatch {
                data: vec![shape.0, shape.1],
                expected: vec![div, div],
            });
        }
        Ok(())
    }
}

impl SparseTransform for HaarTransform {
    fn analysis(&self, image: ArrayView2<'_, c64>) -> Result<Vec<Array2<c64>>, Error> {
        self.check_divisible(image.dim())?;
        let mut details: Vec<[Array2<c64>; 3]> = Vec::with_capacity(self.nb_scale);
        let mut cur = image.to_owned();
        for _ in 0..self.nb_scale {
            let (ll, lh, hl, dd) = Self::step(cur.view());
            details.push([lh, hl, dd]);
            cur = ll;
        }
        let mut bands = vec![cur];
        for group in details.into_iter().rev() {
            bands.extend(group.iter().cloned());
        }
        Ok(bands)
    }

    fn synthesis(&self, bands: &[Array2<c64>]) -> Result<Array2<c64>, Error> {
        let expected = 1 + 3 * self.nb_scale;
        if bands.len() != expected {
            return Err(Error::ShapeMismatch {
                data: vec![bands.len()],
                expected: vec![expected],
            });
        }
        let mut cur = bands[0].clone();
        for s in 0..self.nb_scale {
            let base = 1 + 3 * s;
            cur = Self::inverse_step(&cur, &bands[base], &bands[base + 1], &bands[base + 2]);
        }
        Ok(cur)
    }

    fn nb_band_per_scale(&self) -> usize {
        3
    }
}

/// Flatten coefficient bands into one vector plus the manifest that inverts
/// the flattening.
pub fn flatten(bands: &[Array2<c64>]) -> (Array1<c64>, CoeffsManifest) {
    let manifest = CoeffsManifest {
        band_shapes: bands.iter().map(|b| b.dim()).collect(),
    };
    let mut flat = Vec::with_capacity(manifest.nb_coeffs());
    for band in bands {
        flat.extend(band.iter().cloned());
    }
    (Array1::from(flat), manifest)
}

/// Fold a flat coefficient vector back into bands under `manifest`.
pub fn unflatten(
    coeffs: ArrayView1<'_, c64>,
    manifest: &CoeffsManifest,
) -> Result<Vec<Array2<c64>>, Error> {
    if coeffs.len() != manifest.nb_coeffs() {
        return Err(Error::ShapeMismatch {
            data: vec![coeffs.len()],
            expected: vec![manifest.nb_coeffs()],
        });
    }
    let mut bands = Vec::with_capacity(manifest.nb_bands());
    for (range, shape) in manifest.band_ranges() {
        let band = Array1::from_iter(coeffs.slice(s![range]).iter().cloned())
            .into_shape(shape)?;
        bands.push(band);
    }
    Ok(bands)
}

/// Uniform `op`/`adj_op` interface over a named sparsifying transform.
pub struct WaveletAdapter {
    transform: Box<dyn SparseTransform>,
    nb_scale: usize,
}

impl WaveletAdapter {
    /// Build an adapter for a registered transform name.
    pub fn new(wavelet_name: &str, nb_scale: usize) -> Result<Self, Error> {
        let transform = load_transform(wavelet_name, nb_scale)?;
        Ok(WaveletAdapter {
            transform,
            nb_scale,
        })
    }

    pub fn nb_scale(&self) -> usize {
        self.nb_scale
    }

    pub fn nb_band_per_scale(&self) -> usize {
        self.transform.nb_band_per_scale()
    }

    /// Decompose a single-channel image into flat coefficients and the shape
    /// manifest needed to invert the flattening.
    pub fn op(&self, image: ArrayView2<'_, c64>) -> Result<(Array1<c64>, CoeffsManifest), Error> {
        let bands = self.transform.analysis(image)?;
        Ok(flatten(&bands))
    }

    /// Reconstruct a single-channel image from flat coefficients.
    pub fn adj_op(
        &self,
        coeffs: ArrayView1<'_, c64>,
        manifest: &CoeffsManifest,
    ) -> Result<Array2<c64>, Error> {
        let bands = unflatten(coeffs, manifest)?;
        self.transform.synthesis(&bands)
    }

    /// Per-channel decomposition of a `(channels, h, w)` stack into a
    /// `(channels, coeffs)` array. Band shapes are identical across channels,
    /// so a single manifest covers the stack.
    pub fn op_multichannel(
        &self,
        image: ArrayView3<'_, c64>,
    ) -> Result<(Array2<c64>, CoeffsManifest), Error> {
        let channels = image.dim().0;
        let mut rows: Vec<Array1<c64>> = Vec::with_capacity(channels);
        let mut manifest = None;
        for l in 0..channels {
            let (flat, m) = self.op(image.index_axis(Axis(0), l))?;
            rows.push(flat);
            manifest = Some(m);
        }
        let manifest = manifest.ok_or(Error::MissingConfig("at least one channel"))?;
        let n = manifest.nb_coeffs();
        let mut out = Array2::zeros((channels, n));
        for (l, row) in rows.into_iter().enumerate() {
            out.row_mut(l).assign(&row);
        }
        Ok((out, manifest))
    }

    /// Per-channel reconstruction of a `(channels, coeffs)` array into a
    /// `(channels, h, w)` stack.
    pub fn adj_op_multichannel(
        &self,
        coeffs: ArrayView2<'_, c64>,
        manifest: &CoeffsManifest,
    ) -> Result<Array3<c64>, Error> {
        let channels = coeffs.dim().0;
        let mut images: Vec<Array2<c64>> = Vec::with_capacity(channels);
        for l in 0..channels {
            images.push(self.adj_op(coeffs.row(l), manifest)?);
        }
        let (h, w) = images[0].dim();
        let mut out = Array3::zeros((channels, h, w));
        for (l, img) in images.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), l).assign(&img);
        }
        Ok(out)
    }

    /// Norm of the transform applied to a centered unit impulse, used to
    /// calibrate regularization weights against the transform's gain.
    /// Shapes are rounded up to even in each dimension so the center index
    /// is well defined.
    pub fn l2norm(&self, shape: (usize, usize)) -> Result<f64, Error> {
        let shape = (shape.0 + shape.0 % 2, shape.1 + shape.1 % 2);
        let mut fake = Array2::zeros(shape);
        fake[[shape.0 / 2, shape.1 / 2]] = c64::new(1.0, 0.0);
        let (coeffs, _) = self.op(fake.view())?;
        Ok(l2_norm(coeffs.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(h: usize, w: usize) -> Array2<c64> {
        Array2::from_shape_fn((h, w), |(i, j)| {
            c64::new((3 * i + j) as f64 / 5.0, (i as f64 - j as f64) / 4.0)
        })
    }

    #[test]
    fn unknown_transform_fails_fast() {
        assert!(matches!(
            WaveletAdapter::new("db4", 2),
            Err(Error::UnknownTransform(_))
        ));
    }

    #[test]
    fn registry_lists_known_names() {
        for name in available_transforms() {
            assert!(load_transform(name, 1).is_ok());
        }
    }

    #[test]
    fn haar_round_trip() {
        let adapter = WaveletAdapter::new("haar", 2).unwrap();
        let x = test_image(8, 8);
        let (coeffs, manifest) = adapter.op(x.view()).unwrap();
        assert_eq!(manifest.nb_bands(), 1 + 3 * 2);
        assert_eq!(manifest.nb_coeffs(), 64);
        let back = adapter.adj_op(coeffs.view(), &manifest).unwrap();
        assert!(l2_norm((&back - &x).view()) < 1e-12);
    }

    #[test]
    fn haar_is_orthonormal() {
        let adapter = WaveletAdapter::new("haar", 3).unwrap();
        let x = test_image(8, 8);
        let (coeffs, _) = adapter.op(x.view()).unwrap();
        assert!((l2_norm(coeffs.view()) - l2_norm(x.view())).abs() < 1e-12);
        assert!((adapter.l2norm((8, 8)).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn l2norm_rounds_odd_shapes_up() {
        let adapter = WaveletAdapter::new("identity", 1).unwrap();
        assert!((adapter.l2norm((7, 9)).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn multichannel_round_trip() {
        let adapter = WaveletAdapter::new("haar", 1).unwrap();
        let mut stack = Array3::zeros((2, 4, 4));
        stack
            .index_axis_mut(Axis(0), 0)
            .assign(&test_image(4, 4));
        stack
            .index_axis_mut(Axis(0), 1)
            .assign(&test_image(4, 4).mapv(|v| v * c64::new(0.0, 1.0)));
        let (coeffs, manifest) = adapter.op_multichannel(stack.view()).unwrap();
        assert_eq!(coeffs.dim(), (2, 16));
        let back = adapter
            .adj_op_multichannel(coeffs.view(), &manifest)
            .unwrap();
        assert!(l2_norm((&back - &stack).view()) < 1e-12);
    }

    #[test]
    fn mismatched_manifest_is_an_error() {
        let adapter = WaveletAdapter::new("haar", 1).unwrap();
        let (_, manifest) = adapter.op(test_image(4, 4).view()).unwrap();
        let short = Array1::zeros(manifest.nb_coeffs() - 1);
        assert!(adapter.adj_op(short.view(), &manifest).is_err());
    }
}
