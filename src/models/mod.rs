//! # Target Models
//!
//! Graphical models the flow is trained against. Each model can draw joint
//! samples `(x, y)`, score latents under its prior and observations under its
//! likelihood, and exposes both its faithful (true) dependency structure and
//! a random structure of the same size for ablations.

mod arithmetic;
mod augmented;
mod bigger_graph;
mod gaussian_bn;
mod state_space;
mod toy;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use rand::{Rng, RngCore};

use crate::error::{Error, Result};
use crate::graph::AdjacencySet;

pub use arithmetic::SimpleArithmeticCircuit;
pub use augmented::AugmentedModel;
pub use bigger_graph::{BiggerGraph, BiggerGraphVariant};
pub use gaussian_bn::GaussianBayesianNetwork;
pub use state_space::StateSpaceModel;
pub use toy::{BernoulliMixture, CircleModel, SineModel};

/// Interface of a target graphical model
pub trait TargetModel: Send + Sync {
    /// Registry identifier
    fn name(&self) -> &str;

    /// Number of latent variables `L`
    fn dim_latent(&self) -> usize;

    /// Number of observed variables `C`
    fn dim_condition(&self) -> usize;

    /// Draw one joint sample `(x, y)`
    fn sample(&self, rng: &mut dyn RngCore) -> (Array1<f64>, Array1<f64>);

    /// Log prior density of every row of `x`
    fn log_prior(&self, x: &Array2<f64>) -> Array1<f64>;

    /// Log likelihood of every row of `y` given the matching row of `x`
    fn log_likelihood(&self, x: &Array2<f64>, y: &Array2<f64>) -> Array1<f64>;

    /// True dependency structure
    fn faithful_adjacency(&self) -> &AdjacencySet;

    /// Random structure with the same number of edges
    fn rand_adjacency(&self) -> &AdjacencySet;
}

/// Registry of the available target models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    GaussianBn,
    Sine,
    Circle,
    StateSpace,
    StateSpaceLarger,
    BiggerGraph(BiggerGraphVariant),
    SimpleArithmeticCircuit,
    BernoulliMixture,
}

impl ModelKind {
    pub const ALL: [ModelKind; 13] = [
        ModelKind::GaussianBn,
        ModelKind::Sine,
        ModelKind::Circle,
        ModelKind::StateSpace,
        ModelKind::StateSpaceLarger,
        ModelKind::BiggerGraph(BiggerGraphVariant::Linear),
        ModelKind::BiggerGraph(BiggerGraphVariant::Nonlinear),
        ModelKind::BiggerGraph(BiggerGraphVariant::Mixed),
        ModelKind::BiggerGraph(BiggerGraphVariant::Product),
        ModelKind::BiggerGraph(BiggerGraphVariant::MixedUnitNoise),
        ModelKind::BiggerGraph(BiggerGraphVariant::Shifted),
        ModelKind::SimpleArithmeticCircuit,
        ModelKind::BernoulliMixture,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            ModelKind::GaussianBn => "gaussian_bn",
            ModelKind::Sine => "crazy1d",
            ModelKind::Circle => "circle",
            ModelKind::StateSpace => "state_space",
            ModelKind::StateSpaceLarger => "state_space_larger",
            ModelKind::BiggerGraph(variant) => variant.identifier(),
            ModelKind::SimpleArithmeticCircuit => "simple_arith_circuit",
            ModelKind::BernoulliMixture => "ber_gmm",
        }
    }

    /// Construct the model; `rng` seeds its random adjacency
    pub fn build(&self, rng: &mut dyn RngCore) -> Result<Box<dyn TargetModel>> {
        let model: Box<dyn TargetModel> = match self {
            ModelKind::GaussianBn => Box::new(GaussianBayesianNetwork::new(rng)?),
            ModelKind::Sine => Box::new(SineModel::new()?),
            ModelKind::Circle => Box::new(CircleModel::new()),
            ModelKind::StateSpace => Box::new(StateSpaceModel::new("state_space", 4, rng)?),
            ModelKind::StateSpaceLarger => {
                Box::new(StateSpaceModel::new("state_space_larger", 10, rng)?)
            }
            ModelKind::BiggerGraph(variant) => Box::new(BiggerGraph::new(*variant, rng)?),
            ModelKind::SimpleArithmeticCircuit => Box::new(SimpleArithmeticCircuit::new(rng)?),
            ModelKind::BernoulliMixture => Box::new(BernoulliMixture::new(0.5)?),
        };
        Ok(model)
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.identifier() == s)
            .ok_or_else(|| Error::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Draw `batch_size × repeat` joint samples as row matrices `(x, y)`
pub fn sample_batch<R: Rng>(
    model: &dyn TargetModel,
    batch_size: usize,
    repeat: usize,
    rng: &mut R,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let rows = batch_size * repeat.max(1);
    let dim_latent = model.dim_latent();
    let dim_condition = model.dim_condition();
    let mut xs = Vec::with_capacity(rows * dim_latent);
    let mut ys = Vec::with_capacity(rows * dim_condition);

    for _ in 0..rows {
        let (x, y) = model.sample(rng);
        if x.len() != dim_latent {
            return Err(Error::DimensionMismatch {
                context: "model latent sample",
                expected: dim_latent,
                actual: x.len(),
            });
        }
        if y.len() != dim_condition {
            return Err(Error::DimensionMismatch {
                context: "model observation sample",
                expected: dim_condition,
                actual: y.len(),
            });
        }
        xs.extend(x.iter());
        ys.extend(y.iter());
    }

    let x = Array2::from_shape_vec((rows, dim_latent), xs)?;
    let y = Array2::from_shape_vec((rows, dim_condition), ys)?;
    Ok((x, y))
}

/// Apply a per-row scoring function to a batch
pub(crate) fn score_rows<F>(x: &Array2<f64>, f: F) -> Array1<f64>
where
    F: Fn(&[f64]) -> f64,
{
    x.outer_iter()
        .map(|row| {
            let row = row.to_vec();
            f(&row)
        })
        .collect()
}

/// Apply a per-row scoring function to paired batches
pub(crate) fn score_pairs<F>(x: &Array2<f64>, y: &Array2<f64>, f: F) -> Array1<f64>
where
    F: Fn(&[f64], &[f64]) -> f64,
{
    x.outer_iter()
        .zip(y.outer_iter())
        .map(|(xr, yr)| {
            let (xr, yr) = (xr.to_vec(), yr.to_vec());
            f(&xr, &yr)
        })
        .collect()
}
