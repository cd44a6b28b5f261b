//! Low-dimensional toy models with multimodal posteriors.

use std::f64::consts::PI;

use ndarray::{array, Array1, Array2};
use rand::{Rng, RngCore};

use super::{score_pairs, score_rows, TargetModel};
use crate::distributions::{log_add_exp, normal_log_prob, sample_normal};
use crate::error::{Error, Result};
use crate::graph::AdjacencySet;

/// `x ~ N(0, π)`, `y ~ N(sin x, 0.01)`
#[derive(Debug, Clone)]
pub struct SineModel {
    adjacency: AdjacencySet,
}

impl SineModel {
    const PRIOR_STD: f64 = PI;
    const NOISE_STD: f64 = 0.01;

    pub fn new() -> Result<Self> {
        let adjacency = AdjacencySet::new(1, 1, [(0, 0), (0, 1)])?;
        Ok(Self { adjacency })
    }
}

impl TargetModel for SineModel {
    fn name(&self) -> &str {
        "crazy1d"
    }

    fn dim_latent(&self) -> usize {
        1
    }

    fn dim_condition(&self) -> usize {
        1
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let x = sample_normal(rng, 0.0, Self::PRIOR_STD);
        let y = sample_normal(rng, x.sin(), Self::NOISE_STD);
        (array![x], array![y])
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| normal_log_prob(x[0], 0.0, Self::PRIOR_STD))
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| normal_log_prob(y[0], x[0].sin(), Self::NOISE_STD))
    }

    fn faithful_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }

    fn rand_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }
}

/// `x0, x1 ~ N(0, 1)`, `y ~ N(x0² + x1², 0.01)`: the posterior is a ring
#[derive(Debug, Clone)]
pub struct CircleModel {
    adjacency: AdjacencySet,
}

impl CircleModel {
    const NOISE_STD: f64 = 0.01;

    pub fn new() -> Self {
        Self {
            adjacency: AdjacencySet::fully_connected(2, 1),
        }
    }
}

impl Default for CircleModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetModel for CircleModel {
    fn name(&self) -> &str {
        "circle"
    }

    fn dim_latent(&self) -> usize {
        2
    }

    fn dim_condition(&self) -> usize {
        1
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let x0 = sample_normal(rng, 0.0, 1.0);
        let x1 = sample_normal(rng, 0.0, 1.0);
        let y = sample_normal(rng, x0 * x0 + x1 * x1, Self::NOISE_STD);
        (array![x0, x1], array![y])
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| normal_log_prob(x[0], 0.0, 1.0) + normal_log_prob(x[1], 0.0, 1.0))
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| {
            normal_log_prob(y[0], x[0] * x[0] + x[1] * x[1], Self::NOISE_STD)
        })
    }

    fn faithful_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }

    fn rand_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }
}

/// `y ~ Bernoulli(p)`, `x ~ N(2y − 1, 0.1)`: a two-component mixture prior
#[derive(Debug, Clone)]
pub struct BernoulliMixture {
    prob: f64,
    adjacency: AdjacencySet,
}

impl BernoulliMixture {
    const COMPONENT_STD: f64 = 0.1;

    pub fn new(prob: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&prob) {
            return Err(Error::ConfigError(format!(
                "mixture probability must lie in [0, 1], got {}",
                prob
            )));
        }
        let adjacency = AdjacencySet::new(1, 1, [(0, 1), (0, 0)])?;
        Ok(Self { prob, adjacency })
    }
}

impl TargetModel for BernoulliMixture {
    fn name(&self) -> &str {
        "ber_gmm"
    }

    fn dim_latent(&self) -> usize {
        1
    }

    fn dim_condition(&self) -> usize {
        1
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let y = if rng.gen_bool(self.prob) { 1.0 } else { 0.0 };
        let x = sample_normal(rng, 2.0 * y - 1.0, Self::COMPONENT_STD);
        (array![x], array![y])
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        let (ln_low, ln_high) = ((1.0 - self.prob).ln(), self.prob.ln());
        score_rows(x, |x| {
            log_add_exp(
                normal_log_prob(x[0], -1.0, Self::COMPONENT_STD) + ln_low,
                normal_log_prob(x[0], 1.0, Self::COMPONENT_STD) + ln_high,
            )
        })
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| {
            normal_log_prob(x[0], 2.0 * y[0] - 1.0, Self::COMPONENT_STD)
        })
    }

    fn faithful_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }

    fn rand_adjacency(&self) -> &AdjacencySet {
        &self.adjacency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sine_adjacency_reads_condition() {
        let model = SineModel::new().unwrap();
        assert!(model.faithful_adjacency().contains(0, 1));
        assert_eq!(model.faithful_adjacency().len(), 2);
    }

    #[test]
    fn test_circle_observation_near_radius() {
        let model = CircleModel::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (x, y) = model.sample(&mut rng);
        assert_abs_diff_eq!(y[0], x[0] * x[0] + x[1] * x[1], epsilon = 0.1);
    }

    #[test]
    fn test_mixture_prior_symmetric() {
        let model = BernoulliMixture::new(0.5).unwrap();
        let x = array![[-1.0], [1.0]];
        let lp = model.log_prior(&x);
        assert_abs_diff_eq!(lp[0], lp[1], epsilon = 1e-12);
        assert!(BernoulliMixture::new(1.5).is_err());
    }

    #[test]
    fn test_mixture_likelihood_selects_component() {
        let model = BernoulliMixture::new(0.5).unwrap();
        let x = array![[1.0]];
        let near = model.log_likelihood(&x, &array![[1.0]]);
        let far = model.log_likelihood(&x, &array![[0.0]]);
        assert!(near[0] > far[0]);
    }
}
