//! Control perturbations drawn from a multivariate Gaussian.

use crate::error::{MppiError, Result};
use ndarray::{Array2, Array3};
use rand::Rng;
use rand_distr::StandardNormal;

/// Draws K x T x nu noise from N(mu, sigma).
///
/// The generator owns its random source, so two samplers built from the
/// same seed produce the same noise.
#[derive(Debug, Clone)]
pub struct NoiseSampler<R: Rng> {
    mu: na::DVector<f64>,
    /// 下三角コレスキー因子
    l: na::DMatrix<f64>,
    sigma_inv: na::DMatrix<f64>,
    sample_null_action: bool,
    rng: R,
}

impl<R: Rng> NoiseSampler<R> {
    pub fn new(
        sigma: na::DMatrix<f64>,
        mu: na::DVector<f64>,
        sample_null_action: bool,
        rng: R,
    ) -> Result<Self> {
        let nu = sigma.nrows();
        if nu == 0 || !sigma.is_square() {
            return Err(MppiError::config("noise covariance must be square"));
        }
        if mu.len() != nu {
            return Err(MppiError::config(format!(
                "noise mean has length {}, expected {nu}",
                mu.len()
            )));
        }
        if !sigma.iter().all(|v| v.is_finite()) {
            return Err(MppiError::config("noise covariance must be finite"));
        }
        if (&sigma - sigma.transpose()).amax() > 1e-9 * sigma.amax().max(1.0) {
            return Err(MppiError::config("noise covariance must be symmetric"));
        }
        let chol = sigma
            .cholesky()
            .ok_or_else(|| MppiError::config("noise covariance must be positive definite"))?;
        Ok(Self {
            mu,
            l: chol.l(),
            sigma_inv: chol.inverse(),
            sample_null_action,
            rng,
        })
    }

    pub fn control_dim(&self) -> usize {
        self.mu.len()
    }

    pub fn sigma_inv(&self) -> &na::DMatrix<f64> {
        &self.sigma_inv
    }

    /// Fresh K x T x nu noise. With the null action enabled the last
    /// sample is all zero.
    pub fn sample(&mut self, k: usize, t: usize) -> Array3<f64> {
        let nu = self.control_dim();
        let mut noise = Array3::zeros((k, t, nu));
        for mut seq in noise.outer_iter_mut() {
            for mut u in seq.outer_iter_mut() {
                let z = na::DVector::<f64>::from_fn(nu, |_, _| self.rng.sample(StandardNormal));
                let e = &self.l * z + &self.mu;
                u.iter_mut().zip(e.iter()).for_each(|(dst, src)| *dst = *src);
            }
        }
        if self.sample_null_action && k > 0 {
            noise.index_axis_mut(ndarray::Axis(0), k - 1).fill(0.0);
        }
        noise
    }

    /// T x nu standard normal values, used to seed a random nominal sequence.
    pub fn standard_normal(&mut self, t: usize, nu: usize) -> Array2<f64> {
        Array2::from_shape_simple_fn((t, nu), || self.rng.sample(StandardNormal))
    }
}
