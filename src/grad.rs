//! Data-fidelity gradient operators.
//!
//! Each operator models the differentiable term `f(x) = 0.5||Mx - y||^2`
//! for one formulation of the forward model `M`: image-domain (analysis),
//! coefficient-domain (synthesis), and their parallel-imaging variants with
//! per-channel sensitivity maps. The Lipschitz constant of the gradient is
//! estimated once at construction by power iteration and cached as
//! `spec_rad`/`inv_spec_rad`; it must be recomputed if the forward model or
//! channel configuration changes.

use ndarray::prelude::*;
use ndarray::Dimension;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use num_complex::Complex64 as c64;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Error;
use crate::fourier::FourierOperator;
use crate::linear::{CoeffsManifest, WaveletAdapter};
use crate::utils::{l2_norm, l2_norm_sq};

/// Power-iteration controls for the spectral-radius estimate.
#[derive(Clone, Copy, Debug)]
pub struct PowerIterOpts {
    /// Stop when the relative change of the iterate norm drops below this.
    pub tolerance: f64,
    pub max_iter: usize,
    /// Safety margin applied to the final estimate to guard against
    /// underestimation from early truncation.
    pub growth_factor: f64,
}

impl Default for PowerIterOpts {
    fn default() -> Self {
        PowerIterOpts {
            tolerance: 1e-4,
            max_iter: 20,
            growth_factor: 1.1,
        }
    }
}

/// Estimate the spectral radius of a normal operator `x -> MᵗMx` by power
/// iteration from `x0`.
pub fn power_iteration<D: Dimension>(
    normal: impl Fn(ArrayView<'_, c64, D>) -> Result<Array<c64, D>, Error>,
    x0: Array<c64, D>,
    opts: &PowerIterOpts,
) -> Result<f64, Error> {
    let mut x_old = x0;
    let mut norm_old = l2_norm(x_old.view());
    let mut norm_new = norm_old;
    for i in 0..opts.max_iter {
        let scale = norm_old.max(f64::EPSILON);
        let x_new = normal(x_old.view())?.mapv(|v| v / scale);
        norm_new = l2_norm(x_new.view());
        let rel_change = (norm_new - norm_old).abs() / norm_old.max(f64::EPSILON);
        x_old = x_new;
        norm_old = norm_new;
        if rel_change < opts.tolerance {
            log::debug!("power iteration converged after {} steps", i + 1);
            break;
        }
    }
    Ok(opts.growth_factor * norm_new)
}

// Deterministically seeded start vector, same distribution as a uniform
// random draw on [0, 1).
fn initial_vector<D: Dimension>(dim: D) -> Array<c64, D> {
    let mut rng = StdRng::seed_from_u64(0);
    Array::random_using(dim, Uniform::new(0.0, 1.0), &mut rng).mapv(|v: f64| c64::new(v, 0.0))
}

/// Common contract of all gradient operators.
///
/// `Dom` is the dimension of the optimization variable, `Range` that of the
/// measurement domain.
pub trait GradOperator {
    type Dom: Dimension;
    type Range: Dimension;

    /// Forward model `Mx`.
    fn op(&self, x: ArrayView<'_, c64, Self::Dom>) -> Result<Array<c64, Self::Range>, Error>;

    /// Adjoint chain `Mᵗd`, applied in reverse order of `op`.
    fn adj_op(&self, d: ArrayView<'_, c64, Self::Range>) -> Result<Array<c64, Self::Dom>, Error>;

    /// Observed data `y`.
    fn obs(&self) -> ArrayView<'_, c64, Self::Range>;

    fn spec_rad(&self) -> f64;

    fn inv_spec_rad(&self) -> f64;

    /// Normal operator `MᵗMx`.
    fn normal(&self, x: ArrayView<'_, c64, Self::Dom>) -> Result<Array<c64, Self::Dom>, Error> {
        self.adj_op(self.op(x)?.view())
    }

    /// Fidelity gradient `Mᵗ(Mx - y)`.
    fn gradient(&self, x: ArrayView<'_, c64, Self::Dom>) -> Result<Array<c64, Self::Dom>, Error> {
        let mut residual = self.op(x)?;
        residual -= &self.obs();
        self.adj_op(residual.view())
    }

    /// Fidelity cost `0.5||Mx - y||^2`.
    fn fidelity_cost(&self, x: ArrayView<'_, c64, Self::Dom>) -> Result<f64, Error> {
        let mut residual = self.op(x)?;
        residual -= &self.obs();
        Ok(0.5 * l2_norm_sq(residual.view()))
    }
}

/// Analysis formulation: the variable is the image itself.
pub struct GradAnalysis<F: FourierOperator> {
    y: Array2<c64>,
    fourier: F,
    spec_rad: f64,
    inv_spec_rad: f64,
}

impl<F: FourierOperator> GradAnalysis<F> {
    pub fn new(data: Array2<c64>, fourier: F) -> Result<Self, Error> {
        Self::with_power_opts(data, fourier, &PowerIterOpts::default())
    }

    pub fn with_power_opts(
        data: Array2<c64>,
        fourier: F,
        opts: &PowerIterOpts,
    ) -> Result<Self, Error> {
        let shape = fourier.shape();
        if data.dim() != shape {
            return Err(Error::ShapeMismatch {
                data: vec![data.dim().0, data.dim().1],
                expected: vec![shape.0, shape.1],
            });
        }
        let x0 = initial_vector(Dim(shape));
        let spec_rad = power_iteration(
            |x| fourier.adj_op(fourier.op(x)?.view()),
            x0,
            opts,
        )?;
        Ok(GradAnalysis {
            y: data,
            fourier,
            spec_rad,
            inv_spec_rad: 1.0 / spec_rad,
        })
    }

    pub fn fourier(&self) -> &F {
        &self.fourier
    }
}

impl<F: FourierOperator> GradOperator for GradAnalysis<F> {
    type Dom = Ix2;
    type Range = Ix2;

    fn op(&self, x: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error> {
        self.fourier.op(x)
    }

    fn adj_op(&self, d: ArrayView2<'_, c64>) -> Result<Array2<c64>, Error> {
        self.fourier.adj_op(d)
    }

    fn obs(&self) -> ArrayView2<'_, c64> {
        self.y.view()
    }

    fn spec_rad(&self) -> f64 {
        self.spec_rad
    }

    fn inv_spec_rad(&self) -> f64 {
        self.inv_spec_rad
    }
}

/// Synthesis formulation: the variable is the flat coefficient vector of a
/// sparsifying transform; `Mx` is sampling after the transform's adjoint.
pub struct GradSynthesis<F: FourierOperator> {
    y: Array2<c64>,
    fourier: F,
    linear: WaveletAdapter,
    manifest: CoeffsManifest,
    spec_rad: f64,
    inv_spec_rad: f64,
}

impl<F: FourierOperator> GradSynthesis<F> {
    pub fn new(data: Array2<c64>, fourier: F, linear: WaveletAdapter) -> Result<Self, Error> {
        Self::with_power_opts(data, fourier, linear, &PowerIterOpts::default())
    }

    pub fn with_power_opts(
        data: Array2<c64>,
        fourier: F,
        linear: WaveletAdapter,
        opts: &PowerIterOpts,
    ) -> Result<Self, Error> {
        let shape = fourier.shape();
        if data.dim() != shape {
            return Err(Error::ShapeMismatch {
                data: vec![data.dim().0, data.dim().1],
                expected: vec![shape.0, shape.1],
            });
        }
        // The manifest of this image shape is fixed for the whole run.
        let (_, manifest) = linear.op(Array2::zeros(shape).view())?;
        let x0 = initial_vector(Dim(manifest.nb_coeffs()));
        let spec_rad = power_iteration(
            |alpha| {
                let image = linear.adj_op(alpha, &manifest)?;
                let back = fourier.adj_op(fourier.op(image.view())?.view())?;
                Ok(linear.op(back.view())?.0)
            },
            x0,
            opts,
        )?;
        Ok(GradSynthesis {
            y: data,
            fourier,
            linear,
            manifest,
            spec_rad,
            inv_spec_rad: 1.0 / spec_rad,
        })
    }

    pub fn linear(&self) -> &WaveletAdapter {
        &self.linear
    }

    pub fn manifest(&self) -> &CoeffsManifest {
        &self.manifest
    }
}

impl<F: FourierOperator> GradOperator for GradSynthesis<F> {
    type Dom = Ix1;
    type Range = Ix2;

    fn op(&self, alpha: ArrayView1<'_, c64>) -> Result<Array2<c64>, Error> {
        let image = self.linear.adj_op(alpha, &self.manifest)?;
        self.fourier.op(image.view())
    }

    fn adj_op(&self, d: ArrayView2<'_, c64>) -> Result<Array1<c64>, Error> {
        let image = self.fourier.adj_op(d)?;
        Ok(self.linear.op(image.view())?.0)
    }

    fn obs(&self) -> ArrayView2<'_, c64> {
        self.y.view()
    }

    fn spec_rad(&self) -> f64 {
        self.spec_rad
    }

    fn inv_spec_rad(&self) -> f64 {
        self.inv_spec_rad
    }
}

// Per-channel forward model: sample each sensitivity-weighted copy of the
// image. The channel axis leads, matching the observation layout.
fn pmri_forward<F: FourierOperator>(
    fourier: &F,
    smaps: Option<&Array3<c64>>,
    channels: usize,
    image: ArrayView2<'_, c64>,
) -> Result<Array3<c64>, Error> {
    let (h, w) = fourier.shape();
    let mut out = Array3::zeros((channels, h, w));
    for l in 0..channels {
        let weighted = match smaps {
            Some(maps) => &maps.index_axis(Axis(0), l) * &image,
            None => image.to_owned(),
        };
        out.index_axis_mut(Axis(0), l)
            .assign(&fourier.op(weighted.view())?);
    }
    Ok(out)
}

// Adjoint of `pmri_forward`: the channel reduction is an explicit sum over
// the leading axis.
fn pmri_adjoint<F: FourierOperator>(
    fourier: &F,
    smaps: Option<&Array3<c64>>,
    data: ArrayView3<'_, c64>,
) -> Result<Array2<c64>, Error> {
    let (h, w) = fourier.shape();
    let mut out = Array2::zeros((h, w));
    for l in 0..data.dim().0 {
        let image = fourier.adj_op(data.index_axis(Axis(0), l))?;
        match smaps {
            Some(maps) => {
                let conj = maps.index_axis(Axis(0), l).mapv(|v| v.conj());
                out += &(&conj * &image);
            }
            None => out += &image,
        }
    }
    Ok(out)
}

fn check_pmri_shapes<F: FourierOperator>(
    data: &Array3<c64>,
    smaps: &Option<Array3<c64>>,
    fourier: &F,
) -> Result<(), Error> {
    let (channels, h, w) = data.dim();
    let shape = fourier.shape();
    if (h, w) != shape {
        return Err(Error::ShapeMismatch {
            data: vec![channels, h, w],
            expected: vec![channels, shape.0, shape.1],
        });
    }
    if let Some(maps) = smaps {
        if maps.dim() != data.dim() {
            let (mc, mh, mw) = maps.dim();
            return Err(Error::ShapeMismatch {
                data: vec![mc, mh, mw],
                expected: vec![channels, h, w],
            });
        }
    }
    Ok(())
}

/// Parallel-imaging analysis formulation: one image, multichannel
/// observations combined through per-channel sensitivity maps.
pub struct GradPmriAnalysis<F: FourierOperator> {
    y: Array3<c64>,
    smaps: Option<Array3<c64>>,
    fourier: F,
    spec_rad: f64,
    inv_spec_rad: f64,
}

impl<F: FourierOperator> GradPmriAnalysis<F> {
    pub fn new(data: Array3<c64>, smaps: Option<Array3<c64>>, fourier: F) -> Result<Self, Error> {
        Self::with_power_opts(data, smaps, fourier, &PowerIterOpts::default())
    }

    pub fn with_power_opts(
        data: Array3<c64>,
        smaps: Option<Array3<c64>>,
        fourier: F,
        opts: &PowerIterOpts,
    ) -> Result<Self, Error> {
        check_pmri_shapes(&data, &smaps, &fourier)?;
        let channels = data.dim().0;
        let x0 = initial_vector(Dim(fourier.shape()));
        let spec_rad = power_iteration(
            |x| {
                let d = pmri_forward(&fourier, smaps.as_ref(), channels, x)?;
                pmri_adjoint(&fourier, smaps.as_ref(), d.view())
            },
            x0,
            opts,
        )?;
        Ok(GradPmriAnalysis {
            y: data,
            smaps,
            fourier,
            spec_rad,
            inv_spec_rad: 1.0 / spec_rad,
        })
    }
}

impl<F: FourierOperator> GradOperator for GradPmriAnalysis<F> {
    type Dom = Ix2;
    type Range = Ix3;

    fn op(&self, x: ArrayView2<'_, c64>) -> Result<Array3<c64>, Error> {
        pmri_forward(&self.fourier, self.smaps.as_ref(), self.y.dim().0, x)
    }

    fn adj_op(&self, d: ArrayView3<'_, c64>) -> Result<Array2<c64>, Error> {
        pmri_adjoint(&self.fourier, self.smaps.as_ref(), d)
    }

    fn obs(&self) -> ArrayView3<'_, c64> {
        self.y.view()
    }

    fn spec_rad(&self) -> f64 {
        self.spec_rad
    }

    fn inv_spec_rad(&self) -> f64 {
        self.inv_spec_rad
    }
}

/// Parallel-imaging synthesis formulation: the variable is the coefficient
/// vector of the single underlying image.
pub struct GradPmriSynthesis<F: FourierOperator> {
    y: Array3<c64>,
    smaps: Option<Array3<c64>>,
    fourier: F,
    linear: WaveletAdapter,
    manifest: CoeffsManifest,
    spec_rad: f64,
    inv_spec_rad: f64,
}

impl<F: FourierOperator> GradPmriSynthesis<F> {
    pub fn new(
        data: Array3<c64>,
        smaps: Option<Array3<c64>>,
        fourier: F,
        linear: WaveletAdapter,
    ) -> Result<Self, Error> {
        Self::with_power_opts(data, smaps, fourier, linear, &PowerIterOpts::default())
    }

    pub fn with_power_opts(
        data: Array3<c64>,
        smaps: Option<Array3<c64>>,
        fourier: F,
        linear: WaveletAdapter,
        opts: &PowerIterOpts,
    ) -> Result<Self, Error> {
        check_pmri_shapes(&data, &smaps, &fourier)?;
        let channels = data.dim().0;
        let (_, manifest) = linear.op(Array2::zeros(fourier.shape()).view())?;
        let x0 = initial_vector(Dim(manifest.nb_coeffs()));
        let spec_rad = power_iteration(
            |alpha| {
                let image = linear.adj_op(alpha, &manifest)?;
                let d = pmri_forward(&fourier, smaps.as_ref(), channels, image.view())?;
                let back = pmri_adjoint(&fourier, smaps.as_ref(), d.view())?;
                Ok(linear.op(back.view())?.0)
            },
            x0,
            opts,
        )?;
        Ok(GradPmriSynthesis {
            y: data,
            smaps,
            fourier,
            linear,
            manifest,
            spec_rad,
            inv_spec_rad: 1.0 / spec_rad,
        })
    }

    pub fn linear(&self) -> &WaveletAdapter {
        &self.linear
    }

    pub fn manifest(&self) -> &CoeffsManifest {
        &self.manifest
    }
}

impl<F: FourierOperator> GradOperator for GradPmriSynthesis<F> {
    type Dom = Ix1;
    type Range = Ix3;

    fn op(&self, alpha: ArrayView1<'_, c64>) -> Result<Array3<c64>, Error> {
        let image = self.linear.adj_op(alpha, &self.manifest)?;
        pmri_forward(&self.fourier, self.smaps.as_ref(), self.y.dim().0, image.view())
    }

    fn adj_op(&self, d: ArrayView3<'_, c64>) -> Result<Array1<c64>, Error> {
        let image = pmri_adjoint(&self.fourier, self.smaps.as_ref(), d)?;
        Ok(self.linear.op(image.view())?.0)
    }

    fn obs(&self) -> ArrayView3<'_, c64> {
        self.y.view()
    }

    fn spec_rad(&self) -> f64 {
        self.spec_rad
    }

    fn inv_spec_rad(&self) -> f64 {
        self.inv_spec_rad
    }
}
