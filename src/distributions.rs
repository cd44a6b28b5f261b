//! Scalar log-densities and samplers used by the target models and the loss.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Open01, StandardNormal};

/// `0.5 * ln(2π)`
pub const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

/// Log-density of `N(mean, std²)` at `x`
pub fn normal_log_prob(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    -0.5 * z * z - std.ln() - HALF_LN_2PI
}

/// Log-density of `Laplace(loc, scale)` at `x`
pub fn laplace_log_prob(x: f64, loc: f64, scale: f64) -> f64 {
    -(x - loc).abs() / scale - (2.0 * scale).ln()
}

/// Row-wise log-density of a standard normal, summed over columns
pub fn standard_normal_log_density(z: &Array2<f64>) -> Array1<f64> {
    let dim = z.ncols() as f64;
    z.mapv(|v| -0.5 * v * v).sum_axis(Axis(1)) - dim * HALF_LN_2PI
}

/// Draw from `N(mean, std²)`
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std * z
}

/// Draw from `Laplace(loc, scale)` by inverting the CDF
pub fn sample_laplace<R: Rng + ?Sized>(rng: &mut R, loc: f64, scale: f64) -> f64 {
    let u: f64 = rng.sample::<f64, _>(Open01) - 0.5;
    loc - scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
}

/// `ln(exp(a) + exp(b))` without overflow
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// `ln(1 + exp(x))`
pub fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}
