//! # ODE Dynamics Function
//!
//! Right-hand side of the augmented flow ODE. The state is one matrix
//!
//! ```text
//! [ x (B × L) | log p (B × 1) | reg_1 … reg_k (B × k) ]
//! ```
//!
//! and its derivative is `[v, −vᵀ(∂v/∂x)ε · ε, integrands]`, where `v` is the
//! signed network velocity and `ε` a probe drawn once per integration
//! (Hutchinson trace estimator).

use ndarray::{s, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::network::DynamicsNetwork;
use super::regularization::RegularizationTracker;

/// Distribution of the trace-estimator probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceEstimator {
    /// Standard normal entries
    Gaussian,
    /// Uniform ±1 entries
    Rademacher,
}

impl Default for DivergenceEstimator {
    fn default() -> Self {
        DivergenceEstimator::Gaussian
    }
}

/// Network velocity augmented with divergence and regularization channels
#[derive(Debug, Clone)]
pub struct OdeDynamicsFunction {
    network: DynamicsNetwork,
    divergence: DivergenceEstimator,
    regularization: RegularizationTracker,
}

impl OdeDynamicsFunction {
    pub fn new(
        network: DynamicsNetwork,
        divergence: DivergenceEstimator,
        regularization: RegularizationTracker,
    ) -> Self {
        Self {
            network,
            divergence,
            regularization,
        }
    }

    pub fn network(&self) -> &DynamicsNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut DynamicsNetwork {
        &mut self.network
    }

    pub fn regularization(&self) -> &RegularizationTracker {
        &self.regularization
    }

    pub fn divergence(&self) -> DivergenceEstimator {
        self.divergence
    }

    pub fn dim_latent(&self) -> usize {
        self.network.dim_latent()
    }

    /// Width of the augmented state
    pub fn state_width(&self) -> usize {
        self.network.dim_latent() + 1 + self.regularization.len()
    }

    /// Draw the fixed probe for one integration call
    pub fn draw_probe<R: Rng + ?Sized>(&self, batch: usize, rng: &mut R) -> Array2<f64> {
        let shape = (batch, self.network.dim_latent());
        match self.divergence {
            DivergenceEstimator::Gaussian => Array2::random_using(shape, StandardNormal, rng),
            DivergenceEstimator::Rademacher => {
                Array2::from_shape_simple_fn(shape, || if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            }
        }
    }

    /// Derivative of the augmented state
    ///
    /// `t` is the physical network time and `sign` is `+1` for forward and
    /// `-1` for reverse integration. Returns the derivative together with the
    /// signed velocity.
    pub fn augmented_derivative(
        &self,
        t: f64,
        sign: f64,
        state: &Array2<f64>,
        condition: ArrayView2<f64>,
        probe: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let l = self.network.dim_latent();
        let x = state.slice(s![.., ..l]);

        let (velocity, vjp) = self.network.velocity_and_vjp(t, x, condition, probe);
        let velocity = velocity * sign;
        let trace = (vjp * probe).sum_axis(Axis(1));

        let mut derivative = Array2::zeros((state.nrows(), self.state_width()));
        derivative.slice_mut(s![.., ..l]).assign(&velocity);
        derivative.column_mut(l).assign(&(trace * -sign));
        if !self.regularization.is_empty() {
            let integrands = self
                .regularization
                .integrands(&self.network, t, sign, x, condition, &velocity);
            derivative.slice_mut(s![.., l + 1..]).assign(&integrands);
        }

        (derivative, velocity)
    }
}
