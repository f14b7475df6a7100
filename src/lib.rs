//! The `ndarray-recon` crate reconstructs images from undersampled
//! frequency-domain (k-space) measurements by solving a regularized linear
//! inverse problem: recover `x` such that a sampling operator applied to
//! `x` approximates the observed data, subject to a sparsity or low-rank
//! penalty on a transform of `x`.
//!
//! The building blocks are:
//! - gradient operators modeling the data-fidelity term, with a
//!   power-iteration Lipschitz estimate ([`grad`])
//! - proximity operators enforcing structured sparsity or low-rank priors
//!   ([`prox`])
//! - the FISTA and Condat-Vu iterative solvers combining them ([`recon`])
//!
//! The Fourier forward model and the sparsifying transform are treated as
//! opaque `op`/`adj_op` collaborators; [`fourier`] and [`linear`] ship
//! reference implementations (a masked unitary FFT, identity and Haar
//! transforms) that the solvers and tests build on.

#![cfg_attr(all(rustc_nightly, test), feature(test))]
#[cfg(all(rustc_nightly, test))]
extern crate test;

pub mod error;
pub mod fourier;
pub mod grad;
pub mod linear;
pub mod patch;
pub mod prox;
pub mod recon;
pub mod utils;

pub use error::Error;
