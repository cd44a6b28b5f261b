//! Small arithmetic circuit with heavy-tailed roots and nonlinear gates.

use ndarray::{Array1, Array2};
use rand::RngCore;

use super::{score_pairs, score_rows, TargetModel};
use crate::distributions::{laplace_log_prob, normal_log_prob, sample_laplace, sample_normal};
use crate::error::Result;
use crate::graph::AdjacencySet;

const NOISE_STD: f64 = 0.1;

/// ```text
/// x0 ~ Laplace(5, 1)          x1 ~ Laplace(−2, 1)
/// x2 ~ N(tanh(x0 + x1 − 2.8), 0.1)
/// x3 ~ N(x0 · x1, 0.1)
/// x4 ~ N(7, 2)
/// x5 ~ N(tanh(x3 + x4), 0.1)
/// y0 ~ N(x3, 0.1)             y1 ~ N(x5, 0.1)
/// ```
#[derive(Debug, Clone)]
pub struct SimpleArithmeticCircuit {
    faithful: AdjacencySet,
    random: AdjacencySet,
}

impl SimpleArithmeticCircuit {
    pub fn new(rng: &mut dyn RngCore) -> Result<Self> {
        let edges = [
            (0, 1), (0, 2), (0, 3), (1, 3), (2, 1), (2, 3),
            (3, 6), (3, 7), (4, 3), (4, 5), (5, 3), (5, 7),
        ];
        let faithful = AdjacencySet::with_self_loops(6, 2, edges)?;
        let random = AdjacencySet::random(6, 2, faithful.len(), rng)?;
        Ok(Self { faithful, random })
    }

    fn x2_mean(x: &[f64]) -> f64 {
        (x[0] + x[1] - 2.8).tanh()
    }

    fn x5_mean(x: &[f64]) -> f64 {
        (x[3] + x[4]).tanh()
    }
}

impl TargetModel for SimpleArithmeticCircuit {
    fn name(&self) -> &str {
        "simple_arith_circuit"
    }

    fn dim_latent(&self) -> usize {
        6
    }

    fn dim_condition(&self) -> usize {
        2
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let mut x = [0.0; 6];
        x[0] = sample_laplace(rng, 5.0, 1.0);
        x[1] = sample_laplace(rng, -2.0, 1.0);
        x[2] = sample_normal(rng, Self::x2_mean(&x), NOISE_STD);
        x[3] = sample_normal(rng, x[0] * x[1], NOISE_STD);
        x[4] = sample_normal(rng, 7.0, 2.0);
        x[5] = sample_normal(rng, Self::x5_mean(&x), NOISE_STD);

        let y = [
            sample_normal(rng, x[3], NOISE_STD),
            sample_normal(rng, x[5], NOISE_STD),
        ];
        (Array1::from(x.to_vec()), Array1::from(y.to_vec()))
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| {
            laplace_log_prob(x[0], 5.0, 1.0)
                + laplace_log_prob(x[1], -2.0, 1.0)
                + normal_log_prob(x[2], Self::x2_mean(x), NOISE_STD)
                + normal_log_prob(x[3], x[0] * x[1], NOISE_STD)
                + normal_log_prob(x[4], 7.0, 2.0)
                + normal_log_prob(x[5], Self::x5_mean(x), NOISE_STD)
        })
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| {
            normal_log_prob(y[0], x[3], NOISE_STD) + normal_log_prob(y[1], x[5], NOISE_STD)
        })
    }

    fn faithful_adjacency(&self) -> &AdjacencySet {
        &self.faithful
    }

    fn rand_adjacency(&self) -> &AdjacencySet {
        &self.random
    }
}
