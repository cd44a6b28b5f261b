//! # Dynamics Layer
//!
//! Time-conditioned affine layer ("concat-squash"):
//!
//! ```text
//! out = ((x · (W ⊙ M)ᵀ) + b) ⊙ σ(g_w · t + g_b) + h_w · t
//! ```
//!
//! The sigmoid gate and the time-proportional bias depend on the scalar time
//! only and are broadcast over the batch. The mask `M` is optional; a masked
//! layer can never route an input into an output the mask disconnects.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::error::{Error, Result};
use crate::graph::{AdjacencySet, WeightMask};

/// Time-conditioned layer with optional structural mask
#[derive(Debug, Clone)]
pub struct DynamicsLayer {
    weight: Array2<f64>,
    bias: Array1<f64>,
    gate_weight: Array1<f64>,
    gate_bias: Array1<f64>,
    time_bias_weight: Array1<f64>,
    mask: Option<WeightMask>,
}

impl DynamicsLayer {
    /// Unconstrained layer
    pub fn dense<R: Rng + ?Sized>(dim_in: usize, dim_out: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (dim_in.max(1) as f64).sqrt();
        let linear = Uniform::new_inclusive(-bound, bound);
        let hyper = Uniform::new_inclusive(-1.0, 1.0);

        Self {
            weight: Array2::from_shape_simple_fn((dim_out, dim_in), || linear.sample(rng)),
            bias: Array1::from_shape_simple_fn(dim_out, || linear.sample(rng)),
            gate_weight: Array1::from_shape_simple_fn(dim_out, || hyper.sample(rng)),
            gate_bias: Array1::from_shape_simple_fn(dim_out, || hyper.sample(rng)),
            time_bias_weight: Array1::from_shape_simple_fn(dim_out, || hyper.sample(rng)),
            mask: None,
        }
    }

    /// Layer whose weight is constrained by the adjacency structure
    pub fn masked<R: Rng + ?Sized>(
        dim_in: usize,
        dim_out: usize,
        adjacency: &AdjacencySet,
        rng: &mut R,
    ) -> Result<Self> {
        let mask = WeightMask::from_adjacency(dim_in, dim_out, adjacency)?;
        let mut layer = Self::dense(dim_in, dim_out, rng);
        layer.mask = Some(mask);
        Ok(layer)
    }

    pub fn dim_in(&self) -> usize {
        self.weight.ncols()
    }

    pub fn dim_out(&self) -> usize {
        self.weight.nrows()
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    pub fn mask(&self) -> Option<&WeightMask> {
        self.mask.as_ref()
    }

    /// Weight with the structural mask applied
    pub fn effective_weight(&self) -> Array2<f64> {
        match &self.mask {
            Some(mask) => mask.apply(&self.weight),
            None => self.weight.clone(),
        }
    }

    fn gate(&self, t: f64) -> Array1<f64> {
        (&self.gate_weight * t + &self.gate_bias).mapv(sigmoid)
    }

    /// Forward pass for a batch `x` of shape `(batch, dim_in)`
    pub fn forward(&self, t: f64, x: &Array2<f64>) -> Array2<f64> {
        let pre = x.dot(&self.effective_weight().t()) + &self.bias;
        pre * &self.gate(t) + &(&self.time_bias_weight * t)
    }

    /// Vector-Jacobian product with respect to the layer input
    ///
    /// `cotangent` has shape `(batch, dim_out)`; the result `(batch, dim_in)`.
    pub fn vjp_input(&self, t: f64, cotangent: &Array2<f64>) -> Array2<f64> {
        let scaled = cotangent * &self.gate(t);
        scaled.dot(&self.effective_weight())
    }

    /// Jacobian `∂out/∂in` of shape `(dim_out, dim_in)`
    ///
    /// The layer is affine in its input, so the Jacobian depends on time only.
    pub fn input_jacobian(&self, t: f64) -> Array2<f64> {
        let gate = self.gate(t).insert_axis(Axis(1));
        self.effective_weight() * &gate
    }

    pub fn num_params(&self) -> usize {
        self.weight.len()
            + self.bias.len()
            + self.gate_weight.len()
            + self.gate_bias.len()
            + self.time_bias_weight.len()
    }

    /// Append all trainable parameters to `params`
    pub fn write_params(&self, params: &mut Vec<f64>) {
        params.extend(self.weight.iter());
        params.extend(self.bias.iter());
        params.extend(self.gate_weight.iter());
        params.extend(self.gate_bias.iter());
        params.extend(self.time_bias_weight.iter());
    }

    /// Read parameters from the front of `params`, returning how many were used
    pub fn read_params(&mut self, params: &[f64]) -> Result<usize> {
        if params.len() < self.num_params() {
            return Err(Error::ParameterLength {
                expected: self.num_params(),
                actual: params.len(),
            });
        }

        let mut offset = 0;
        for value in self
            .weight
            .iter_mut()
            .chain(self.bias.iter_mut())
            .chain(self.gate_weight.iter_mut())
            .chain(self.gate_bias.iter_mut())
            .chain(self.time_bias_weight.iter_mut())
        {
            *value = params[offset];
            offset += 1;
        }
        Ok(offset)
    }

    /// Parameters keyed by `{prefix}.weight`, `{prefix}.hyper_gate.bias`, ...
    pub fn named_params(&self, prefix: &str, out: &mut BTreeMap<String, Vec<f64>>) {
        out.insert(format!("{}.weight", prefix), self.weight.iter().copied().collect());
        out.insert(format!("{}.bias", prefix), self.bias.to_vec());
        out.insert(format!("{}.hyper_gate.weight", prefix), self.gate_weight.to_vec());
        out.insert(format!("{}.hyper_gate.bias", prefix), self.gate_bias.to_vec());
        out.insert(format!("{}.hyper_bias.weight", prefix), self.time_bias_weight.to_vec());
    }

    /// Inverse of [`DynamicsLayer::named_params`]
    pub fn load_named_params(&mut self, prefix: &str, params: &BTreeMap<String, Vec<f64>>) -> Result<()> {
        copy_named(params, &format!("{}.weight", prefix), self.weight.iter_mut())?;
        copy_named(params, &format!("{}.bias", prefix), self.bias.iter_mut())?;
        copy_named(params, &format!("{}.hyper_gate.weight", prefix), self.gate_weight.iter_mut())?;
        copy_named(params, &format!("{}.hyper_gate.bias", prefix), self.gate_bias.iter_mut())?;
        copy_named(params, &format!("{}.hyper_bias.weight", prefix), self.time_bias_weight.iter_mut())?;
        Ok(())
    }
}

fn copy_named<'a, I>(params: &BTreeMap<String, Vec<f64>>, name: &str, target: I) -> Result<()>
where
    I: ExactSizeIterator<Item = &'a mut f64>,
{
    let values = params
        .get(name)
        .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
    if values.len() != target.len() {
        return Err(Error::ParameterLength {
            expected: target.len(),
            actual: values.len(),
        });
    }
    for (dst, &src) in target.zip(values.iter()) {
        *dst = src;
    }
    Ok(())
}

/// Logistic sigmoid
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = DynamicsLayer::dense(4, 3, &mut rng);
        let x = Array2::ones((5, 4));
        let out = layer.forward(0.5, &x);
        assert_eq!(out.dim(), (5, 3));
    }

    #[test]
    fn test_forward_formula() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = DynamicsLayer::dense(2, 1, &mut rng);
        // weight [1, 2], bias 0.5, gate sigmoid(0 * t + 0) = 0.5, time bias 3 t
        layer.read_params(&[1.0, 2.0, 0.5, 0.0, 0.0, 3.0]).unwrap();

        let out = layer.forward(2.0, &array![[1.0, 1.0]]);
        assert_abs_diff_eq!(out[[0, 0]], (1.0 + 2.0 + 0.5) * 0.5 + 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vjp_matches_jacobian() {
        let mut rng = StdRng::seed_from_u64(2);
        let layer = DynamicsLayer::dense(3, 2, &mut rng);
        let t = 0.3;
        let jac = layer.input_jacobian(t);
        let v = array![[0.7, -1.1]];
        let vjp = layer.vjp_input(t, &v);

        for b in 0..3 {
            let expected = 0.7 * jac[[0, b]] - 1.1 * jac[[1, b]];
            assert_abs_diff_eq!(vjp[[0, b]], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_masked_jacobian_zero_outside_edges() {
        let mut rng = StdRng::seed_from_u64(3);
        let adjacency = AdjacencySet::with_self_loops(2, 1, [(1, 2)]).unwrap();
        let mut layer = DynamicsLayer::masked(4, 2, &adjacency, &mut rng).unwrap();

        // Perturb every weight, including masked ones
        let params: Vec<f64> = (0..layer.num_params()).map(|i| 0.1 * i as f64 + 0.3).collect();
        layer.read_params(&params).unwrap();

        for &t in &[0.0, 0.4, 1.0] {
            let jac = layer.input_jacobian(t);
            for a in 0..2 {
                for b in 0..4 {
                    if !adjacency.contains(a, b) {
                        assert_eq!(jac[[a, b]], 0.0);
                    } else {
                        assert!(jac[[a, b]] != 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_param_roundtrip_through_names() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = DynamicsLayer::dense(3, 2, &mut rng);
        let mut named = BTreeMap::new();
        layer.named_params("layers.0", &mut named);
        assert_eq!(named.len(), 5);

        let mut other = DynamicsLayer::dense(3, 2, &mut rng);
        other.load_named_params("layers.0", &named).unwrap();

        let mut a = Vec::new();
        let mut b = Vec::new();
        layer.write_params(&mut a);
        other.write_params(&mut b);
        assert_eq!(a, b);
    }
}
