//! Diagonal Gaussian helpers for latent-variable blocks.

use crate::core::{Error, Result};
use ndarray::{s, Array, Array4, ArrayView1, Axis, Dimension, Ix4, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// `ln(2π)`.
const LOG_2PI: f32 = 1.837_877;

/// Squash into `(-5, 5)` with `5 tanh(x / 5)`.
pub fn soft_clamp5<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| 5.0 * (v / 5.0).tanh())
}

fn check_same(context: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(Error::shape(context, expected, actual));
    }
    Ok(())
}

/// Elementwise normal distribution with soft-clamped mean and log-scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Normal<D: Dimension> {
    mu: Array<f32, D>,
    sigma: Array<f32, D>,
}

impl<D: Dimension> Normal<D> {
    /// Create from a mean and a log standard deviation.
    pub fn new(mu: &Array<f32, D>, log_sigma: &Array<f32, D>) -> Result<Self> {
        Self::with_temperature(mu, log_sigma, 1.0)
    }

    /// Create with the scale multiplied by `temperature`.
    pub fn with_temperature(
        mu: &Array<f32, D>,
        log_sigma: &Array<f32, D>,
        temperature: f32,
    ) -> Result<Self> {
        check_same("normal log-scale", mu.shape(), log_sigma.shape())?;
        if temperature.is_nan() || temperature <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sampling temperature must be positive, got {}",
                temperature
            )));
        }
        Ok(Self {
            mu: soft_clamp5(mu),
            sigma: soft_clamp5(log_sigma).mapv(|v| v.exp() * temperature),
        })
    }

    /// Clamped mean.
    pub fn mu(&self) -> &Array<f32, D> {
        &self.mu
    }

    /// Standard deviation.
    pub fn sigma(&self) -> &Array<f32, D> {
        &self.sigma
    }

    /// Draw `mu + sigma * eps` with `eps ~ N(0, 1)`, returning the sample and
    /// the noise.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (Array<f32, D>, Array<f32, D>) {
        let eps = self.mu.map(|_| {
            let e: f32 = StandardNormal.sample(rng);
            e
        });
        (self.reparameterize(&eps), eps)
    }

    fn reparameterize(&self, eps: &Array<f32, D>) -> Array<f32, D> {
        let mut z = eps.clone();
        Zip::from(&mut z)
            .and(&self.sigma)
            .and(&self.mu)
            .for_each(|v, &sigma, &mu| *v = *v * sigma + mu);
        z
    }

    /// Reparameterized sample for given noise.
    pub fn sample_given_eps(&self, eps: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_same("normal noise", self.mu.shape(), eps.shape())?;
        Ok(self.reparameterize(eps))
    }

    /// Elementwise log density of `samples`.
    pub fn log_p(&self, samples: &Array<f32, D>) -> Result<Array<f32, D>> {
        check_same("normal samples", self.mu.shape(), samples.shape())?;
        let mut out = samples.clone();
        Zip::from(&mut out).and(&self.mu).and(&self.sigma).for_each(|v, &mu, &sigma| {
            let z = (*v - mu) / sigma;
            *v = -0.5 * z * z - 0.5 * LOG_2PI - sigma.ln();
        });
        Ok(out)
    }

    /// Elementwise `KL(self || other)`.
    pub fn kl(&self, other: &Normal<D>) -> Result<Array<f32, D>> {
        check_same("normal kl", self.mu.shape(), other.mu.shape())?;
        let mut out = Array::zeros(self.mu.raw_dim());
        Zip::from(&mut out)
            .and(&self.mu)
            .and(&self.sigma)
            .and(&other.mu)
            .and(&other.sigma)
            .for_each(|o, &mu1, &sigma1, &mu2, &sigma2| {
                let term1 = (mu1 - mu2) / sigma2;
                let term2 = sigma1 / sigma2;
                *o = 0.5 * (term1 * term1 + term2 * term2) - 0.5 - term2.ln();
            });
        Ok(out)
    }
}

impl Normal<Ix4> {
    /// Split `(batch, 2c, h, w)` decoder output into mean and log-scale
    /// halves along the channel axis.
    pub fn from_channels(param: &Array4<f32>) -> Result<Self> {
        let channels = param.dim().1;
        if channels == 0 || channels % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "normal parameters need an even channel count, got {}",
                channels
            )));
        }
        let half = channels / 2;
        Self::new(
            &param.slice(s![.., ..half, .., ..]).to_owned(),
            &param.slice(s![.., half.., .., ..]).to_owned(),
        )
    }
}

fn logsumexp(values: ArrayView1<'_, f32>) -> f32 {
    let max = values.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    if max.is_infinite() {
        return max;
    }
    max + values.iter().map(|&v| (v - max).exp()).sum::<f32>().ln()
}

/// Total-correlation penalty of `(batch, n, h, w)` samples under a diagonal
/// Gaussian with log variance `logvar`.
///
/// Per batch row, `log q(z) - Σ log q(z_i)` with both terms reduced by
/// log-sum-exp over axis 1, then min-max scaled across the batch and
/// averaged. A batch whose penalties are all equal scores 0.
pub fn log_density_gaussian(
    sample: &Array4<f32>,
    mu: &Array4<f32>,
    logvar: &Array4<f32>,
) -> Result<f32> {
    check_same("gaussian mean", sample.shape(), mu.shape())?;
    check_same("gaussian log variance", sample.shape(), logvar.shape())?;
    let (batch, n, h, w) = sample.dim();
    if batch == 0 || n == 0 {
        return Err(Error::shape("gaussian sample", &[1, 1, h, w], sample.shape()));
    }

    let mut density = Array4::zeros(sample.raw_dim());
    Zip::from(&mut density)
        .and(sample)
        .and(mu)
        .and(logvar)
        .for_each(|d, &x, &m, &lv| {
            *d = -0.5 * (LOG_2PI + lv) - 0.5 * (x - m) * (x - m) * (-lv).exp();
        });

    let joint = density.sum_axis(Axis(3)).sum_axis(Axis(2));
    let log_qz = joint.map_axis(Axis(1), |row| logsumexp(row));
    let log_prod_qzi = density
        .map_axis(Axis(1), |lane| logsumexp(lane))
        .sum_axis(Axis(2))
        .sum_axis(Axis(1));

    let penalty = &log_qz - &log_prod_qzi;
    let lo = penalty.fold(f32::INFINITY, |m, &v| m.min(v));
    let hi = penalty.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    if hi <= lo {
        return Ok(0.0);
    }
    Ok(penalty.mapv(|v| (v - lo) / (hi - lo)).sum() / batch as f32)
}
