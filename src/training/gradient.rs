//! Zeroth-order gradient estimators.
//!
//! The loss is a black box `θ ↦ f(θ)` evaluated through the ODE solver, so
//! gradients are estimated from loss differences. Callers should make `f`
//! deterministic within one step (common random numbers), otherwise the
//! sampling noise dominates the differences.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the gradient of the training objective is estimated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradientEstimator {
    /// Simultaneous perturbation along random ±1 directions
    Spsa {
        /// Perturbation size `c`
        perturbation: f64,
        /// Directions averaged per step
        samples: usize,
    },
    /// One pair of evaluations per parameter
    CentralDifference { epsilon: f64 },
}

impl Default for GradientEstimator {
    fn default() -> Self {
        GradientEstimator::Spsa {
            perturbation: 1e-2,
            samples: 2,
        }
    }
}

/// Gradient together with the loss evaluations spent on it
#[derive(Debug, Clone)]
pub struct GradientEstimate {
    pub gradient: Array1<f64>,
    pub loss_evaluations: usize,
}

impl GradientEstimator {
    /// Loss evaluations needed for `num_params` parameters
    pub fn evaluations(&self, num_params: usize) -> usize {
        match self {
            GradientEstimator::Spsa { samples, .. } => 2 * samples,
            GradientEstimator::CentralDifference { .. } => 2 * num_params,
        }
    }

    fn validate(&self) -> Result<()> {
        let (step, count) = match self {
            GradientEstimator::Spsa {
                perturbation,
                samples,
            } => (*perturbation, *samples),
            GradientEstimator::CentralDifference { epsilon } => (*epsilon, 1),
        };
        if !(step > 0.0 && step.is_finite()) || count == 0 {
            return Err(Error::ConfigError(format!(
                "invalid gradient estimator {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Estimate `∇f(params)`
    pub fn estimate<R, F>(&self, params: &Array1<f64>, rng: &mut R, mut loss: F) -> Result<GradientEstimate>
    where
        R: Rng + ?Sized,
        F: FnMut(&Array1<f64>) -> Result<f64>,
    {
        self.validate()?;
        let n = params.len();
        let mut gradient = Array1::zeros(n);

        match *self {
            GradientEstimator::Spsa {
                perturbation,
                samples,
            } => {
                for _ in 0..samples {
                    let delta: Array1<f64> =
                        (0..n).map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 }).collect();
                    let shift = &delta * perturbation;
                    let plus = loss(&(params + &shift))?;
                    let minus = loss(&(params - &shift))?;
                    // 1 / Δ_i = Δ_i for ±1 entries
                    gradient = gradient + delta * ((plus - minus) / (2.0 * perturbation));
                }
                gradient /= samples as f64;
            }
            GradientEstimator::CentralDifference { epsilon } => {
                let mut probe = params.clone();
                for i in 0..n {
                    probe[i] = params[i] + epsilon;
                    let plus = loss(&probe)?;
                    probe[i] = params[i] - epsilon;
                    let minus = loss(&probe)?;
                    probe[i] = params[i];
                    gradient[i] = (plus - minus) / (2.0 * epsilon);
                }
            }
        }

        Ok(GradientEstimate {
            gradient,
            loss_evaluations: self.evaluations(n),
        })
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn quadratic(x: &Array1<f64>) -> Result<f64> {
        Ok(x[0] * x[0] + 3.0 * x[1] * x[1] - x[0] * x[1])
    }

    #[test]
    fn test_central_difference_exact_on_quadratic() {
        let estimator = GradientEstimator::CentralDifference { epsilon: 1e-4 };
        let mut rng = StdRng::seed_from_u64(0);
        let x = array![1.0, 2.0];
        let estimate = estimator.estimate(&x, &mut rng, quadratic).unwrap();
        assert_abs_diff_eq!(estimate.gradient[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(estimate.gradient[1], 11.0, epsilon = 1e-6);
        assert_eq!(estimate.loss_evaluations, 4);
    }

    #[test]
    fn test_spsa_is_unbiased_on_average() {
        let estimator = GradientEstimator::Spsa {
            perturbation: 1e-3,
            samples: 20_000,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let x = array![1.0, 2.0];
        let estimate = estimator.estimate(&x, &mut rng, quadratic).unwrap();
        assert_abs_diff_eq!(estimate.gradient[0], 0.0, epsilon = 0.5);
        assert_abs_diff_eq!(estimate.gradient[1], 11.0, epsilon = 0.5);
    }

    #[test]
    fn test_spsa_single_parameter_is_exact() {
        let estimator = GradientEstimator::Spsa {
            perturbation: 1e-3,
            samples: 1,
        };
        let mut rng = StdRng::seed_from_u64(2);
        let estimate = estimator
            .estimate(&array![2.0], &mut rng, |x| Ok(x[0] * x[0]))
            .unwrap();
        assert_abs_diff_eq!(estimate.gradient[0], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_errors_propagate() {
        let estimator = GradientEstimator::default();
        let mut rng = StdRng::seed_from_u64(3);
        let result = estimator.estimate(&array![0.0], &mut rng, |_| Err(Error::ConditionNotBound));
        assert!(matches!(result, Err(Error::ConditionNotBound)));

        let invalid = GradientEstimator::CentralDifference { epsilon: 0.0 };
        assert!(invalid.estimate(&array![0.0], &mut rng, quadratic_1d).is_err());
    }

    fn quadratic_1d(x: &Array1<f64>) -> Result<f64> {
        Ok(x[0] * x[0])
    }
}
