//! Latent-space augmentation: extra standard-normal latent dimensions, each
//! attached to one of the original latent variables.

use ndarray::{s, Array1, Array2};
use rand::RngCore;

use super::TargetModel;
use crate::distributions::{normal_log_prob, sample_normal};
use crate::error::{Error, Result};
use crate::graph::{AdjacencyEdge, AdjacencySet};

/// Wraps a model with `k` augmenting dimensions appended after its latents
///
/// Conditioning targets shift by `k`. Augmented dimension `L + j` is linked
/// both ways to its source variable, linked to the other augmented
/// dimensions whose sources are linked, and (in the faithful structure)
/// reads everything its source reads.
pub struct AugmentedModel {
    base: Box<dyn TargetModel>,
    to_augment: Vec<usize>,
    name: String,
    faithful: AdjacencySet,
    random: AdjacencySet,
}

impl AugmentedModel {
    pub fn new(base: Box<dyn TargetModel>, to_augment: Vec<usize>) -> Result<Self> {
        if let Some(&bad) = to_augment.iter().find(|&&i| i >= base.dim_latent()) {
            return Err(Error::ConfigError(format!(
                "cannot augment latent dimension {} of a {}-dimensional model",
                bad,
                base.dim_latent()
            )));
        }

        let faithful = augment_adjacency(base.faithful_adjacency(), &to_augment, true)?;
        let random = augment_adjacency(base.rand_adjacency(), &to_augment, false)?;
        let name = format!("{}_augmented", base.name());

        Ok(Self {
            base,
            to_augment,
            name,
            faithful,
            random,
        })
    }

    pub fn base(&self) -> &dyn TargetModel {
        self.base.as_ref()
    }

    pub fn to_augment(&self) -> &[usize] {
        &self.to_augment
    }

    pub fn num_augmented(&self) -> usize {
        self.to_augment.len()
    }

    fn base_latents(&self, x: &Array2<f64>) -> Array2<f64> {
        x.slice(s![.., ..self.base.dim_latent()]).to_owned()
    }
}

/// Extend an adjacency set with the augmenting dimensions
pub(crate) fn augment_adjacency(
    base: &AdjacencySet,
    to_augment: &[usize],
    copy_inputs: bool,
) -> Result<AdjacencySet> {
    let l = base.dim_latent();
    let k = to_augment.len();
    let shift = |target: usize| if target < l { target } else { target + k };

    let shifted: Vec<AdjacencyEdge> = base
        .edges()
        .map(|e| AdjacencyEdge::new(e.source, shift(e.target)))
        .collect();
    let mut edges = shifted.clone();

    for (j, &source) in to_augment.iter().enumerate() {
        let augmented = l + j;
        if copy_inputs {
            edges.extend(
                shifted
                    .iter()
                    .filter(|e| e.source == source)
                    .map(|e| AdjacencyEdge::new(augmented, e.target)),
            );
        }
        edges.push(AdjacencyEdge::new(source, augmented));
        edges.push(AdjacencyEdge::new(augmented, source));
    }

    for (a, &source_a) in to_augment.iter().enumerate() {
        for (b, &source_b) in to_augment.iter().enumerate() {
            if base.contains(source_a, source_b) {
                edges.push(AdjacencyEdge::new(l + a, l + b));
            }
        }
    }

    AdjacencySet::new(l + k, base.dim_condition(), edges)
}

impl TargetModel for AugmentedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim_latent(&self) -> usize {
        self.base.dim_latent() + self.to_augment.len()
    }

    fn dim_condition(&self) -> usize {
        self.base.dim_condition()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>) {
        let (x, y) = self.base.sample(rng);
        let extra = (0..self.to_augment.len()).map(|_| sample_normal(rng, 0.0, 1.0));
        let augmented: Array1<f64> = x.iter().copied().chain(extra).collect();
        (augmented, y)
    }

    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64> {
        let l = self.base.dim_latent();
        let extra = x
            .slice(s![.., l..])
            .mapv(|v| normal_log_prob(v, 0.0, 1.0))
            .sum_axis(ndarray::Axis(1));
        self.base.log_prior(&self.base_latents(x)) + extra
    }

    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64> {
        self.base.log_likelihood(&self.base_latents(x), y)
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
    use crate::models::{sample_batch, StateSpaceModel};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn augmented(to_augment: Vec<usize>) -> AugmentedModel {
        let mut rng = StdRng::seed_from_u64(0);
        let base = StateSpaceModel::new("state_space", 4, &mut rng).unwrap();
        AugmentedModel::new(Box::new(base), to_augment).unwrap()
    }

    #[test]
    fn test_dimensions() {
        let model = augmented(vec![1, 2]);
        assert_eq!(model.dim_latent(), 6);
        assert_eq!(model.dim_condition(), 4);
        assert_eq!(model.name(), "state_space_augmented");
    }

    #[test]
    fn test_rejects_out_of_range_source() {
        let mut rng = StdRng::seed_from_u64(1);
        let base = StateSpaceModel::new("state_space", 4, &mut rng).unwrap();
        assert!(AugmentedModel::new(Box::new(base), vec![4]).is_err());
    }

    #[test]
    fn test_random_structure_links_augmented_dims() {
        let model = augmented(vec![0, 3]);
        let random = model.rand_adjacency();
        assert!(random.contains(0, 4));
        assert!(random.contains(4, 0));
        assert!(random.contains(3, 5));
        assert!(random.contains(5, 5));
    }

    #[test]
    fn test_prior_scores_augmented_dims() {
        let model = augmented(vec![2]);
        let mut rng = StdRng::seed_from_u64(2);
        let (x, _) = sample_batch(&model, 3, 1, &mut rng).unwrap();
        let base_prior = model.base().log_prior(&x.slice(s![.., ..4]).to_owned());
        let prior = model.log_prior(&x);
        for i in 0..3 {
            let expected = base_prior[i] + normal_log_prob(x[[i, 4]], 0.0, 1.0);
            assert_abs_diff_eq!(prior[i], expected, epsilon = 1e-12);
        }
    }
}
