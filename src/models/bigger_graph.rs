//! Seventeen-variable directed graph with five observations.
//!
//! Six parameterisations share the structure and the observation map. They
//! differ in the link functions of the conditional means and in the noise
//! scale (`0.1` for variants 1 to 3, unit noise for 4 to 6).

use ndarray::{Array1, Array2};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{score_pairs, score_rows, TargetModel};
use crate::distributions::{normal_log_prob, sample_normal, softplus};
use crate::error::Result;
use crate::graph::AdjacencySet;

const DIM_LATENT: usize = 17;
const DIM_CONDITION: usize = 5;
const OBSERVATION_STD: f64 = 0.1;

/// Latent variable observed by each observation
const OBSERVED: [usize; DIM_CONDITION] = [14, 15, 15, 16, 9];

const EDGES: [(usize, usize); 90] = [
    (0, 1), (0, 6), (0, 9),
    (1, 12), (1, 2), (1, 3), (1, 6), (1, 20), (1, 21),
    (10, 14), (10, 15), (10, 20), (10, 21),
    (11, 10), (11, 14), (11, 15), (11, 20), (11, 21),
    (12, 11), (12, 15), (12, 2), (12, 5), (12, 8), (12, 20), (12, 21),
    (13, 1), (13, 12), (13, 16), (13, 6), (13, 21),
    (14, 15), (14, 17), (14, 20), (14, 21),
    (15, 17), (15, 18), (15, 19), (15, 20), (15, 21),
    (16, 1), (16, 12), (16, 6), (16, 20), (16, 21),
    (2, 11), (2, 15), (2, 4), (2, 5), (2, 8), (2, 20), (2, 21),
    (3, 12), (3, 2), (3, 6), (3, 20), (3, 21),
    (4, 11), (4, 15), (4, 5), (4, 7), (4, 8), (4, 20), (4, 21),
    (5, 11), (5, 15), (5, 7), (5, 8), (5, 20), (5, 21),
    (6, 12), (6, 2), (6, 5), (6, 8), (6, 20), (6, 21),
    (7, 10), (7, 11), (7, 15), (7, 8), (7, 20), (7, 21),
    (8, 10), (8, 11), (8, 15), (8, 20), (8, 21),
    (9, 1), (9, 13), (9, 6), (9, 21),
];

/// Conditional parameterisation of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiggerGraphVariant {
    /// Sums of parents, `N(0, 5)` root, `0.1` conditional noise
    Linear,
    /// Sums passed through `tanh`, squares and softplus, `0.1` noise
    Nonlinear,
    /// Linear head with products of parents further down, `0.1` noise
    Mixed,
    /// Products and differences of parents, unit noise everywhere
    Product,
    /// Same means as [`BiggerGraphVariant::Mixed`] with unit noise
    MixedUnitNoise,
    /// Shifted and scaled chain from an `N(10, 1)` root, unit noise
    Shifted,
}

impl BiggerGraphVariant {
    pub const ALL: [BiggerGraphVariant; 6] = [
        BiggerGraphVariant::Linear,
        BiggerGraphVariant::Nonlinear,
        BiggerGraphVariant::Mixed,
        BiggerGraphVariant::Product,
        BiggerGraphVariant::MixedUnitNoise,
        BiggerGraphVariant::Shifted,
    ];

    /// Registry identifier
    pub fn identifier(&self) -> &'static str {
        match self {
            BiggerGraphVariant::Linear => "bigger_graph1",
            BiggerGraphVariant::Nonlinear => "bigger_graph2",
            BiggerGraphVariant::Mixed => "bigger_graph3",
            BiggerGraphVariant::Product => "bigger_graph4",
            BiggerGraphVariant::MixedUnitNoise => "bigger_graph5",
            BiggerGraphVariant::Shifted => "bigger_graph6",
        }
    }

    fn root(&self) -> (f64, f64) {
        match self {
            BiggerGraphVariant::Product => (0.0, 1.0),
            BiggerGraphVariant::Shifted => (10.0, 1.0),
            _ => (0.0, 5.0),
        }
    }

    fn noise(&self) -> f64 {
        match self {
            BiggerGraphVariant::Linear | BiggerGraphVariant::Nonlinear | BiggerGraphVariant::Mixed => 0.1,
            _ => 1.0,
        }
    }

    /// Mean and standard deviation of `x_i` given the earlier variables
    fn conditional(&self, i: usize, x: &[f64]) -> (f64, f64) {
        if i == 0 {
            return self.root();
        }

        let head = match (self, i) {
            (BiggerGraphVariant::Shifted, 1) => Some(x[0] + 2.0),
            (BiggerGraphVariant::Shifted, 2) => Some(x[1] - 3.0),
            (BiggerGraphVariant::Shifted, 3) => Some(x[1] + 1.0),
            (BiggerGraphVariant::Shifted, 4) => Some(2.0 * x[2]),
            (BiggerGraphVariant::Shifted, 5) => Some(3.0 * x[2]),
            (BiggerGraphVariant::Shifted, 6) => Some(0.5 * x[3]),
            (_, 1) => Some(x[0]),
            (_, 2 | 3) => Some(x[1]),
            (_, 4 | 5) => Some(x[2]),
            (_, 6) => Some(x[3]),
            _ => None,
        };
        if let Some(mean) = head {
            return (mean, self.noise());
        }

        let mean = match self {
            BiggerGraphVariant::Linear => match i {
                7 => x[4] + x[5],
                8 => x[6] + x[5],
                9 => x[0] + x[6],
                10 => x[7] + x[8],
                11 => x[7] + x[8] + x[5],
                12 => x[6] + x[8] + x[5],
                13 => x[9] + x[6],
                14 => x[11] + x[10],
                15 => x[2] + x[12] + x[11],
                _ => x[13] + x[12],
            },
            BiggerGraphVariant::Nonlinear => match i {
                7 => (x[4] + x[5]).tanh(),
                8 => (x[6] + x[5]).powi(2),
                9 => softplus(x[0] + x[6]),
                10 => x[7] * x[8] + 2.0,
                11 => x[7] + x[8] * x[5],
                12 => x[6] * x[8] - x[5],
                13 => softplus(x[9] - 2.0 * x[6]),
                14 => x[11] * x[10],
                15 => x[2] + softplus(x[12] * x[11].powi(2)),
                _ => x[13] - x[12],
            },
            BiggerGraphVariant::Mixed | BiggerGraphVariant::MixedUnitNoise => match i {
                7 => x[4] + x[5],
                8 => x[6] + x[5],
                9 => x[0] + x[6],
                10 => x[7] * x[8] + 2.0,
                11 => x[7] + x[8] * x[5],
                12 => x[6] * x[8] - x[5],
                13 => x[9] - 2.0 * x[6],
                14 => x[11] * x[10],
                15 => x[2] + x[12] * x[11],
                _ => x[13] - x[12],
            },
            BiggerGraphVariant::Product | BiggerGraphVariant::Shifted => match i {
                7 => x[4] * x[5],
                8 => x[6] - x[5],
                9 => x[0] + x[6] * x[8],
                10 => x[7] * x[8] + 2.0,
                11 => x[7] + x[8] * x[5],
                12 => x[6] * x[8] - x[5],
                13 => x[9] - 2.0 * x[6],
                14 => x[11] + x[10],
                15 if *self == BiggerGraphVariant::Shifted => x[2] + (x[12] - x[11]),
                15 => x[2] + x[12] * x[11],
                _ => x[13] - x[12],
            },
        };
        (mean, self.noise())
    }
}

/// Seventeen-variable graph model
#[derive(Debug, Clone)]
pub struct BiggerGraph {
    variant: BiggerGraphVariant,
    faithful: AdjacencySet,
    random: AdjacencySet,
}

impl BiggerGraph {
    pub fn new(variant: BiggerGraphVariant, rng: &mut dyn RngCore) -> Result<Self> {
        let faithful = AdjacencySet::with_self_loops(DIM_LATENT, DIM_CONDITION, EDGES)?;
        let random = AdjacencySet::random(DIM_LATENT, DIM_CONDITION, faithful.len(), rng)?;
        Ok(Self {
            variant,
            faithful,
            random,
        })
    }

    pub fn variant(&self) -> BiggerGraphVariant {
        self.variant
    }
}

impl TargetModel for BiggerGraph {
    fn name(&self) -> &str {
        self.variant.identifier()
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
            let (mean, std) = self.variant.conditional(i, &x);
            x[i] = sample_normal(rng, mean, std);
        }
        let y: Vec<f64> = OBSERVED
            .iter()
            .map(|&j| sample_normal(rng, x[j], OBSERVATION_STD))
            .collect();
        (Array1::from(x), Array1::from(y))
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| {
            (0..DIM_LATENT)
                .map(|i| {
                    let (mean, std) = self.variant.conditional(i, x);
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
                .map(|(k, &j)| normal_log_prob(y[k], x[j], OBSERVATION_STD))
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_structure_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = BiggerGraph::new(BiggerGraphVariant::Linear, &mut rng).unwrap();
        assert_eq!(model.faithful_adjacency().len(), 90 + 17);
        assert_eq!(model.rand_adjacency().len(), 90 + 17);
    }

    #[test]
    fn test_linear_sums() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = BiggerGraph::new(BiggerGraphVariant::Linear, &mut rng).unwrap();
        let (x, _) = model.sample(&mut rng);
        assert!((x[7] - (x[4] + x[5])).abs() < 1.0);
        assert!((x[15] - (x[2] + x[12] + x[11])).abs() < 1.0);
    }

    #[test]
    fn test_variants_score_differently() {
        let mut rng = StdRng::seed_from_u64(2);
        let linear = BiggerGraph::new(BiggerGraphVariant::Linear, &mut rng).unwrap();
        let product = BiggerGraph::new(BiggerGraphVariant::Product, &mut rng).unwrap();
        let x = Array2::from_elem((1, DIM_LATENT), 0.5);
        assert!(linear.log_prior(&x)[0] != product.log_prior(&x)[0]);
        assert_eq!(product.name(), "bigger_graph4");
    }

    #[test]
    fn test_identifiers() {
        let names: Vec<&str> = BiggerGraphVariant::ALL.iter().map(|v| v.identifier()).collect();
        assert_eq!(
            names,
            ["bigger_graph1", "bigger_graph2", "bigger_graph3", "bigger_graph4", "bigger_graph5", "bigger_graph6"]
        );
    }

    #[test]
    fn test_prior_matches_sampled_conditionals() {
        let mut rng = StdRng::seed_from_u64(3);
        for variant in BiggerGraphVariant::ALL {
            let model = BiggerGraph::new(variant, &mut rng).unwrap();
            let draws: Vec<Vec<f64>> = (0..1000).map(|_| model.sample(&mut rng).0.to_vec()).collect();

            // Standardized residuals of every conditional are N(0, 1)
            for i in 0..DIM_LATENT {
                let residuals: Vec<f64> = draws
                    .iter()
                    .map(|x| {
                        let (mean, std) = variant.conditional(i, x);
                        (x[i] - mean) / std
                    })
                    .collect();
                let n = residuals.len() as f64;
                let avg = residuals.iter().sum::<f64>() / n;
                let var = residuals.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / (n - 1.0);
                assert!(avg.abs() < 0.15, "{:?} x{} mean {}", variant, i, avg);
                assert!((var - 1.0).abs() < 0.2, "{:?} x{} var {}", variant, i, var);
            }

            let x = Array2::from_shape_vec((1, DIM_LATENT), draws[0].clone()).unwrap();
            let expected: f64 = (0..DIM_LATENT)
                .map(|i| {
                    let (mean, std) = variant.conditional(i, &draws[0]);
                    normal_log_prob(draws[0][i], mean, std)
                })
                .sum();
            assert_abs_diff_eq!(model.log_prior(&x)[0], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_variant_links() {
        let x: Vec<f64> = (0..DIM_LATENT).map(|i| 0.1 * i as f64 - 0.4).collect();

        let (mean, std) = BiggerGraphVariant::Nonlinear.conditional(7, &x);
        assert_abs_diff_eq!(mean, (x[4] + x[5]).tanh(), epsilon = 1e-12);
        assert_abs_diff_eq!(std, 0.1, epsilon = 1e-12);
        let (mean, _) = BiggerGraphVariant::Nonlinear.conditional(9, &x);
        assert_abs_diff_eq!(mean, (1.0 + (x[0] + x[6]).exp()).ln(), epsilon = 1e-12);

        let (mean, _) = BiggerGraphVariant::Mixed.conditional(14, &x);
        assert_abs_diff_eq!(mean, x[11] * x[10], epsilon = 1e-12);
        let (_, std) = BiggerGraphVariant::MixedUnitNoise.conditional(14, &x);
        assert_abs_diff_eq!(std, 1.0, epsilon = 1e-12);

        assert_eq!(BiggerGraphVariant::Shifted.conditional(0, &x), (10.0, 1.0));
        let (mean, _) = BiggerGraphVariant::Shifted.conditional(5, &x);
        assert_abs_diff_eq!(mean, 3.0 * x[2], epsilon = 1e-12);
        let (mean, _) = BiggerGraphVariant::Shifted.conditional(15, &x);
        assert_abs_diff_eq!(mean, x[2] + x[12] - x[11], epsilon = 1e-12);
        let (mean, _) = BiggerGraphVariant::Product.conditional(15, &x);
        assert_abs_diff_eq!(mean, x[2] + x[12] * x[11], epsilon = 1e-12);
    }
}
