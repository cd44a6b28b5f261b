//! Adam over a flat parameter vector.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Adam with coupled L2 weight decay
///
/// The decay term `weight_decay · θ` is added to the gradient before the
/// moment updates, so it is rescaled by the adaptive step like any other
/// gradient component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    #[serde(skip)]
    t: usize,
    #[serde(skip)]
    m: Option<Array1<f64>>,
    #[serde(skip)]
    v: Option<Array1<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            t: 0,
            m: None,
            v: None,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> usize {
        self.t
    }

    /// Apply one update to `params` in place
    pub fn step(&mut self, params: &mut Array1<f64>, gradient: &Array1<f64>) {
        self.t += 1;

        let gradient = if self.weight_decay > 0.0 {
            gradient + &(&*params * self.weight_decay)
        } else {
            gradient.clone()
        };

        // Moments are reset when the parameter count changes
        if self.m.as_ref().map_or(true, |m| m.len() != params.len()) {
            self.m = Some(Array1::zeros(params.len()));
            self.v = Some(Array1::zeros(params.len()));
        }
        let m = self.m.get_or_insert_with(|| Array1::zeros(params.len()));
        let v = self.v.get_or_insert_with(|| Array1::zeros(params.len()));

        // Update biased first moment estimate
        *m = &*m * self.beta1 + &gradient * (1.0 - self.beta1);

        // Update biased second moment estimate
        *v = &*v * self.beta2 + &(&gradient * &gradient) * (1.0 - self.beta2);

        // Compute bias-corrected estimates
        let m_hat = &*m / (1.0 - self.beta1.powi(self.t as i32));
        let v_hat = &*v / (1.0 - self.beta2.powi(self.t as i32));

        *params = &*params - &(&m_hat * self.learning_rate / &(v_hat.mapv(f64::sqrt) + self.epsilon));
    }

    /// Reset optimizer state (for a new training run)
    pub fn reset(&mut self) {
        self.t = 0;
        self.m = None;
        self.v = None;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut params = array![1.0, -2.0];
        adam.step(&mut params, &array![0.5, -3.0]);
        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(params[1], -1.9, epsilon = 1e-6);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut params = array![3.0, -4.0];
        for _ in 0..2000 {
            let gradient = &params * 2.0;
            adam.step(&mut params, &gradient);
        }
        assert_abs_diff_eq!(params[0], 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(params[1], 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_weight_decay_shrinks_without_gradient() {
        let mut adam = Adam::new(0.01).with_weight_decay(1e-2);
        let mut params = array![2.0];
        adam.step(&mut params, &array![0.0]);
        assert!(params[0] < 2.0);

        adam.reset();
        assert_eq!(adam.steps(), 0);
    }
}
