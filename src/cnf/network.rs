//! # Dynamics Network
//!
//! Stack of [`DynamicsLayer`]s defining the velocity field `f(x, c, t)`.
//!
//! Architecture:
//! - input `[x, c, t]` of width `L + C + 1`
//! - layer 0 maps to `L`, all further layers are `L → L`
//! - `tanh` after every layer except the last
//! - residual connections on every hidden layer after the first

use std::collections::BTreeMap;

use ndarray::{s, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::layer::DynamicsLayer;
use crate::error::{Error, Result};
use crate::graph::AdjacencySet;

/// Which layers of a structured network carry a weight mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    /// Only the layer reading the raw `[x, c, t]` input is masked
    FirstLayer,
    /// Hidden `L × L` layers are additionally masked with the latent-to-latent edges
    AllLayers,
}

impl Default for MaskPolicy {
    fn default() -> Self {
        MaskPolicy::FirstLayer
    }
}

/// Velocity field network
#[derive(Debug, Clone)]
pub struct DynamicsNetwork {
    dim_latent: usize,
    dim_condition: usize,
    layers: Vec<DynamicsLayer>,
}

impl DynamicsNetwork {
    /// Fully connected network
    pub fn dense<R: Rng + ?Sized>(
        dim_latent: usize,
        dim_condition: usize,
        num_layers: usize,
        rng: &mut R,
    ) -> Result<Self> {
        check_layer_count(num_layers)?;
        let dim_in = dim_latent + dim_condition + 1;
        let layers = (0..num_layers)
            .map(|l| {
                let width = if l == 0 { dim_in } else { dim_latent };
                DynamicsLayer::dense(width, dim_latent, rng)
            })
            .collect();

        Ok(Self {
            dim_latent,
            dim_condition,
            layers,
        })
    }

    /// Structure-faithful network
    pub fn masked<R: Rng + ?Sized>(
        adjacency: &AdjacencySet,
        num_layers: usize,
        policy: MaskPolicy,
        rng: &mut R,
    ) -> Result<Self> {
        check_layer_count(num_layers)?;
        let dim_latent = adjacency.dim_latent();
        let dim_condition = adjacency.dim_condition();
        let dim_in = dim_latent + dim_condition + 1;

        let mut layers = Vec::with_capacity(num_layers);
        layers.push(DynamicsLayer::masked(dim_in, dim_latent, adjacency, rng)?);
        for _ in 1..num_layers {
            let layer = match policy {
                MaskPolicy::FirstLayer => DynamicsLayer::dense(dim_latent, dim_latent, rng),
                MaskPolicy::AllLayers => DynamicsLayer::masked(dim_latent, dim_latent, adjacency, rng)?,
            };
            layers.push(layer);
        }

        Ok(Self {
            dim_latent,
            dim_condition,
            layers,
        })
    }

    pub fn dim_latent(&self) -> usize {
        self.dim_latent
    }

    pub fn dim_condition(&self) -> usize {
        self.dim_condition
    }

    /// Width of the assembled `[x, c, t]` input
    pub fn dim_input(&self) -> usize {
        self.dim_latent + self.dim_condition + 1
    }

    pub fn layers(&self) -> &[DynamicsLayer] {
        &self.layers
    }

    /// Concatenate latent state, condition and a time column
    pub fn assemble_input(&self, t: f64, x: ArrayView2<f64>, condition: ArrayView2<f64>) -> Array2<f64> {
        let l = self.dim_latent;
        let c = self.dim_condition;
        let mut input = Array2::zeros((x.nrows(), self.dim_input()));
        input.slice_mut(s![.., ..l]).assign(&x);
        input.slice_mut(s![.., l..l + c]).assign(&condition);
        input.column_mut(l + c).fill(t);
        input
    }

    /// Velocity `f(x, c, t)` for a batch
    pub fn velocity(&self, t: f64, x: ArrayView2<f64>, condition: ArrayView2<f64>) -> Array2<f64> {
        let input = self.assemble_input(t, x, condition);
        self.forward_traced(t, &input).0
    }

    /// Velocity together with the exact product `vᵀ ∂f/∂x`
    pub fn velocity_and_vjp(
        &self,
        t: f64,
        x: ArrayView2<f64>,
        condition: ArrayView2<f64>,
        probe: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let input = self.assemble_input(t, x, condition);
        let (velocity, activations) = self.forward_traced(t, &input);
        let grad_input = self.backward(t, &activations, probe);
        let vjp = grad_input.slice(s![.., ..self.dim_latent]).to_owned();
        (velocity, vjp)
    }

    /// Forward pass keeping the `tanh` activations of every hidden layer
    fn forward_traced(&self, t: f64, input: &Array2<f64>) -> (Array2<f64>, Vec<Array2<f64>>) {
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(last);
        let mut h = input.clone();

        for (l, layer) in self.layers[..last].iter().enumerate() {
            let act = layer.forward(t, &h).mapv(f64::tanh);
            h = if l == 0 { act.clone() } else { &act + &h };
            activations.push(act);
        }

        (self.layers[last].forward(t, &h), activations)
    }

    /// Reverse-mode propagation of an output cotangent back to the input
    fn backward(&self, t: f64, activations: &[Array2<f64>], cotangent: &Array2<f64>) -> Array2<f64> {
        let last = self.layers.len() - 1;
        let mut grad = self.layers[last].vjp_input(t, cotangent);

        for l in (0..last).rev() {
            let local = &grad * &activations[l].mapv(|a| 1.0 - a * a);
            let through = self.layers[l].vjp_input(t, &local);
            grad = if l == 0 { through } else { through + &grad };
        }

        grad
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(DynamicsLayer::num_params).sum()
    }

    pub fn get_params(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.num_params());
        for layer in &self.layers {
            layer.write_params(&mut params);
        }
        params
    }

    pub fn set_params(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(Error::ParameterLength {
                expected: self.num_params(),
                actual: params.len(),
            });
        }
        let mut offset = 0;
        for layer in &mut self.layers {
            offset += layer.read_params(&params[offset..])?;
        }
        Ok(())
    }

    pub fn named_params(&self, out: &mut BTreeMap<String, Vec<f64>>) {
        for (l, layer) in self.layers.iter().enumerate() {
            layer.named_params(&format!("layers.{}", l), out);
        }
    }

    pub fn load_named_params(&mut self, params: &BTreeMap<String, Vec<f64>>) -> Result<()> {
        for (l, layer) in self.layers.iter_mut().enumerate() {
            layer.load_named_params(&format!("layers.{}", l), params)?;
        }
        Ok(())
    }
}

fn check_layer_count(num_layers: usize) -> Result<()> {
    if num_layers == 0 {
        return Err(Error::ConfigError(
            "dynamics network needs at least one layer".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
