//! Fourier sampling operators.
//!
//! The reconstruction core treats the forward model as an opaque
//! [`FourierOperator`]; [`CartesianFft2`] is the bundled reference
//! implementation, a unitary 2D FFT restricted to a boolean sampling mask.

use std::sync::Arc;

use ndarray::prelude::*;
use ndarray::Zip;
use num_complex::Complex64 as c64;
use rustfft::{Fft, FftPlanner};

use crate::error::Error;

/// Sampling operator mapping the image domain to the measurement domain.
pub trait FourierOperator {
    /// Image shape the operator acts on.
    fn shape(&self) -> (usize, usize);

    /// Forward model: image to observed k-space samples.
    fn op(&self, image: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error>;

    /// Adjoint model: k-space samples back to the image domain.
    fn adj_op(&self, kspace: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error>;
}

/// Unitary 2D FFT restricted to a Cartesian sampling mask.
///
/// With a full mask this operator is an isometry (`MᵗM = I`), so its
/// spectral radius is exactly one.
pub struct CartesianFft2 {
    mask: Array2<bool>,
    fwd_row: Arc<dyn Fft<f64>>,
    fwd_col: Arc<dyn Fft<f64>>,
    inv_row: Arc<dyn Fft<f64>>,
    inv_col: Arc<dyn Fft<f64>>,
}

impl CartesianFft2 {
    pub fn new(mask: Array2<bool>) -> Self {
        let (h, w) = mask.dim();
        let mut planner = FftPlanner::new();
        CartesianFft2 {
            fwd_row: planner.plan_fft_forward(w),
            fwd_col: planner.plan_fft_forward(h),
            inv_row: planner.plan_fft_inverse(w),
            inv_col: planner.plan_fft_inverse(h),
            mask,
        }
    }

    /// Fully sampled operator, useful as an identity-like isometry.
    pub fn fully_sampled(shape: (usize, usize)) -> Self {
        Self::new(Array2::from_elem(shape, true))
    }

    pub fn mask(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    // Separable 2D transform: rows, then columns via one transpose.
    fn transform(
        &self,
        image: ArrayView2<'_, c64>,
        row: &Arc<dyn Fft<f64>>,
        col: &Arc<dyn Fft<f64>>,
    ) -> Array2<c64> {
        let (h, w) = image.dim();
        let mut out = image.as_standard_layout().into_owned();
        row.process(out.as_slice_mut().unwrap());
        let mut t = out.reversed_axes().as_standard_layout().into_owned();
        col.process(t.as_slice_mut().unwrap());
        let scale = 1.0 / ((h * w) as f64).sqrt();
        let mut back = t.reversed_axes().as_standard_layout().into_owned();
        back.mapv_inplace(|v| v * scale);
        back
    }

    fn apply_mask(&self, mut kspace: Array2<c64>) -> Array2<c64> {
        Zip::from(&mut kspace).and(&self.mask).for_each(|k, &m| {
            if !m {
                *k = c64::new(0.0, 0.0);
            }
        });
        kspace
    }

    fn check_shape(&self, got: (usize, usize)) -> Result<(), Error> {
        if got != self.mask.dim() {
            let (h, w) = self.mask.dim();
            return Err(Error::ShapeMismatch {
                data: vec![got.0, got.1],
                expected: vec![h, w],
            });
        }
        Ok(())
    }
}

impl FourierOperator for CartesianFft2 {
    fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    fn op(&self, image: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error> {
        self.check_shape(image.dim())?;
        let kspace = self.transform(image, &self.fwd_row, &self.fwd_col);
        Ok(self.apply_mask(kspace))
    }

    fn adj_op(&self, kspace: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error> {
        self.check_shape(kspace.dim())?;
        let masked = self.apply_mask(kspace.to_owned());
        Ok(self.transform(masked.view(), &self.inv_row, &self.inv_col))
    }
}
