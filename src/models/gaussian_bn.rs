//! Linear-Gaussian Bayesian network: 7 latent variables in a binary tree,
//! each leaf observed twice.

use ndarray::{Array1, Array2};
use rand::RngCore;

use super::{score_pairs, score_rows, TargetModel};
use crate::distributions::{normal_log_prob, sample_normal};
use crate::error::Result;
use crate::graph::AdjacencySet;

const DIM_LATENT: usize = 7;
const DIM_CONDITION: usize = 8;

/// Parent of each non-root latent variable
const PARENT: [usize; 7] = [0, 0, 0, 1, 1, 2, 2];

/// Latent variable observed by each observation
const OBSERVED: [usize; 8] = [3, 3, 4, 4, 5, 5, 6, 6];

/// `x0 ~ N(20, 10)`, `x1, x2 ~ N(x0, 5)`, `x3, x4 ~ N(x1, 1)`, `x5, x6 ~ N(x2, 1)`,
/// and two unit-variance observations of each leaf.
#[derive(Debug, Clone)]
pub struct GaussianBayesianNetwork {
    faithful: AdjacencySet,
    random: AdjacencySet,
}

impl GaussianBayesianNetwork {
    pub fn new(rng: &mut dyn RngCore) -> Result<Self> {
        let edges = [
            (0, 1), (0, 2),
            (1, 3), (1, 4), (1, 6), (1, 11), (1, 12),
            (2, 1), (2, 5), (2, 6),
            (3, 7), (3, 8), (3, 9), (3, 10), (3, 11), (3, 12), (3, 13), (3, 14),
            (4, 3), (4, 6), (4, 9), (4, 10), (4, 11), (4, 12),
            (5, 1), (5, 6), (5, 11), (5, 12),
            (6, 3), (6, 9), (6, 10), (6, 11), (6, 12), (6, 13), (6, 14),
        ];
        let faithful = AdjacencySet::with_self_loops(DIM_LATENT, DIM_CONDITION, edges)?;
        let random = AdjacencySet::random(DIM_LATENT, DIM_CONDITION, faithful.len(), rng)?;
        Ok(Self { faithful, random })
    }

    fn prior_params(i: usize, x: &[f64]) -> (f64, f64) {
        match i {
            0 => (20.0, 10.0),
            1 | 2 => (x[PARENT[i]], 5.0),
            _ => (x[PARENT[i]], 1.0),
        }
    }
}

impl TargetModel for GaussianBayesianNetwork {
    fn name(&self) -> &str {
        "gaussian_bn"
    }

    fn dim_latent(&self) -> usize {
        DIM_LATENT
    }

    fn dim_condition(&self) -> usize {
        DIM_CONDITION
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let mut x = vec![0.0; DIM_LATENT];
        for i in 0..DIM_LATENT {
            let (mean, std) = Self::prior_params(i, &x);
            x[i] = sample_normal(rng, mean, std);
        }
        let y: Vec<f64> = OBSERVED
            .iter()
            .map(|&j| sample_normal(rng, x[j], 1.0))
            .collect();
        (Array1::from(x), Array1::from(y))
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| {
            (0..DIM_LATENT)
                .map(|i| {
                    let (mean, std) = Self::prior_params(i, x);
                    normal_log_prob(x[i], mean, std)
                })
                .sum()
        })
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| {
            OBSERVED
                .iter()
                .enumerate()
                .map(|(k, &j)| normal_log_prob(y[k], x[j], 1.0))
                .sum()
        })
    }

    fn faithful_adjacency(&self) -> &AdjacencySet {
        &self.faithful
    }

    fn rand_adjacency(&self) -> &AdjacencySet {
        &self.random
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_faithful_structure() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = GaussianBayesianNetwork::new(&mut rng).unwrap();
        let adjacency = model.faithful_adjacency();
        assert_eq!(adjacency.len(), 42);
        assert!(adjacency.contains(3, 7));
        assert!(!adjacency.contains(0, 3));
    }

    #[test]
    fn test_prior_mean() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = GaussianBayesianNetwork::new(&mut rng).unwrap();
        let (x, _) = super::super::sample_batch(&model, 4000, 1, &mut rng).unwrap();
        let mean = x.mean_axis(Axis(0)).unwrap();
        for i in 0..DIM_LATENT {
            assert_abs_diff_eq!(mean[i], 20.0, epsilon = 1.5);
        }
    }

    #[test]
    fn test_log_prior_at_mode() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = GaussianBayesianNetwork::new(&mut rng).unwrap();
        let x = Array2::from_elem((1, DIM_LATENT), 20.0);
        let expected: f64 = [10.0f64, 5.0, 5.0, 1.0, 1.0, 1.0, 1.0]
            .iter()
            .map(|&s| normal_log_prob(0.0, 0.0, s))
            .sum();
        assert_abs_diff_eq!(model.log_prior(&x)[0], expected, epsilon = 1e-12);
    }
}
