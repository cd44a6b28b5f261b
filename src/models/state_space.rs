//! Random-walk state space model with one noisy observation per state.

use ndarray::{Array1, Array2};
use rand::RngCore;

use super::{score_pairs, score_rows, TargetModel};
use crate::distributions::{normal_log_prob, sample_normal};
use crate::error::Result;
use crate::graph::{AdjacencyEdge, AdjacencySet};

const INITIAL_STD: f64 = 5.0;
const TRANSITION_STD: f64 = 0.1;
const OBSERVATION_STD: f64 = 0.1;

/// `x0 ~ N(0, 5)`, `x_i ~ N(x_{i-1}, 0.1)`, `y_i ~ N(x_i, 0.1)`
///
/// State `i` depends on all earlier states and on the observations from
/// step `i` onwards.
#[derive(Debug, Clone)]
pub struct StateSpaceModel {
    name: &'static str,
    steps: usize,
    faithful: AdjacencySet,
    random: AdjacencySet,
}

impl StateSpaceModel {
    pub fn new(name: &'static str, steps: usize, rng: &mut dyn RngCore) -> Result<Self> {
        let edges = (0..steps).flat_map(|i| {
            let earlier = (0..i).map(move |j| AdjacencyEdge::new(i, j));
            let future_observations = (i..steps).map(move |j| AdjacencyEdge::new(i, steps + j));
            earlier.chain(future_observations)
        });
        let faithful = AdjacencySet::with_self_loops(steps, steps, edges)?;
        let random = AdjacencySet::random(steps, steps, faithful.len(), rng)?;
        Ok(Self {
            name,
            steps,
            faithful,
            random,
        })
    }
}

impl TargetModel for StateSpaceModel {
    fn name(&self) -> &str {
        self.name
    }

    fn dim_latent(&self) -> usize {
        self.steps
    }

    fn dim_condition(&self) -> usize {
        self.steps
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let mut x = Array1::zeros(self.steps);
        for i in 0..self.steps {
            x[i] = if i == 0 {
                sample_normal(rng, 0.0, INITIAL_STD)
            } else {
                x[i - 1] + sample_normal(rng, 0.0, TRANSITION_STD)
            };
        }
        let y = x.mapv(|xi| sample_normal(rng, xi, OBSERVATION_STD));
        (x, y)
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        score_rows(x, |x| {
            let initial = normal_log_prob(x[0], 0.0, INITIAL_STD);
            let transitions: f64 = x
                .windows(2)
                .map(|w| normal_log_prob(w[1], w[0], TRANSITION_STD))
                .sum();
            initial + transitions
        })
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        score_pairs(x, y, |x, y| {
            x.iter()
                .zip(y.iter())
                .map(|(&xi, &yi)| normal_log_prob(yi, xi, OBSERVATION_STD))
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_small_structure() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = StateSpaceModel::new("state_space", 4, &mut rng).unwrap();
        let adjacency = model.faithful_adjacency();
        assert_eq!(adjacency.len(), 20);

        let row1: Vec<usize> = adjacency.parents_of(1).collect();
        assert_eq!(row1, vec![0, 1, 5, 6, 7]);
        let row3: Vec<usize> = adjacency.parents_of(3).collect();
        assert_eq!(row3, vec![0, 1, 2, 3, 7]);
    }

    #[test]
    fn test_larger_structure() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = StateSpaceModel::new("state_space_larger", 10, &mut rng).unwrap();
        assert_eq!(model.faithful_adjacency().len(), 110);
        assert!(model.faithful_adjacency().contains(0, 19));
        assert!(!model.faithful_adjacency().contains(9, 18));
    }

    #[test]
    fn test_walk_is_smooth() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = StateSpaceModel::new("state_space", 4, &mut rng).unwrap();
        let (x, y) = model.sample(&mut rng);
        for i in 1..4 {
            assert!((x[i] - x[i - 1]).abs() < 1.0);
            assert!((y[i] - x[i]).abs() < 1.0);
        }
    }
}
