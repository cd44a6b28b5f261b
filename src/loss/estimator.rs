//! Dual-direction KL estimator.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::standardization::DataStatistics;
use crate::cnf::{ContinuousFlow, Direction, RegularizationState};
use crate::distributions::standard_normal_log_density;
use crate::error::{Error, Result};
use crate::models::{sample_batch, TargetModel};

/// Both KL estimates of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    /// Batch mean of `log p(x, y) − log q(x | y)` over model samples
    pub forward_kl: f64,
    /// Batch mean of `log q(x̂ | y) − log p(x̂, y)` over flow samples
    pub reverse_kl: f64,
    /// Regularization states of the forward-KL branch (reverse integration)
    pub forward_reg: Vec<RegularizationState>,
    /// Regularization states of the reverse-KL branch (forward integration)
    pub reverse_reg: Vec<RegularizationState>,
    pub forward_num_evals: u64,
    pub reverse_num_evals: u64,
    /// Per-sample forward KL terms
    pub forward_kl_samples: Array1<f64>,
    /// Per-sample reverse KL terms
    pub reverse_kl_samples: Array1<f64>,
    /// Flow samples `x̂` of the reverse branch, in data space
    pub posterior_samples: Array2<f64>,
}

impl FlowResult {
    /// Symmetric KL, the average of both directions
    pub fn sym_kl(&self) -> f64 {
        0.5 * (self.forward_kl + self.reverse_kl)
    }

    /// Named scalars for a metric sink
    pub fn scalars(&self) -> Vec<(String, f64)> {
        let mut scalars = vec![
            ("forward_kl".to_string(), self.forward_kl),
            ("reverse_kl".to_string(), self.reverse_kl),
            ("forward_solver_evals".to_string(), self.forward_num_evals as f64),
            ("reverse_solver_evals".to_string(), self.reverse_num_evals as f64),
        ];
        for (branch, states) in [("forward", &self.forward_reg), ("reverse", &self.reverse_reg)] {
            scalars.extend(
                states
                    .iter()
                    .map(|state| (format!("{}_{}", branch, state.kind.name()), state.value)),
            );
        }
        scalars
    }
}

/// Estimates forward and reverse KL between a conditional flow and the
/// posterior of a target model
#[derive(Debug, Clone)]
pub struct DualDirectionLossEstimator {
    statistics: DataStatistics,
    batch_size: usize,
    repeat_samples: usize,
}

impl DualDirectionLossEstimator {
    pub fn new(statistics: DataStatistics, batch_size: usize, repeat_samples: usize) -> Result<Self> {
        if batch_size == 0 || repeat_samples == 0 {
            return Err(Error::ConfigError(format!(
                "batch size and repeat count must be positive, got {} and {}",
                batch_size, repeat_samples
            )));
        }
        Ok(Self {
            statistics,
            batch_size,
            repeat_samples,
        })
    }

    pub fn statistics(&self) -> &DataStatistics {
        &self.statistics
    }

    /// Rows per estimate
    pub fn rows(&self) -> usize {
        self.batch_size * self.repeat_samples
    }

    /// Draw one batch and estimate both KL directions on it
    ///
    /// The standardized observations are bound as the flow condition and
    /// stay bound after the call.
    pub fn estimate<R: Rng>(
        &self,
        flow: &mut ContinuousFlow,
        model: &dyn TargetModel,
        rng: &mut R,
    ) -> Result<FlowResult> {
        let (x, y) = sample_batch(model, self.batch_size, self.repeat_samples, rng)?;
        self.estimate_on(flow, model, &x, &y, rng)
    }

    /// Estimate both KL directions on a given batch `(x, y)`
    pub fn estimate_on<R: Rng>(
        &self,
        flow: &mut ContinuousFlow,
        model: &dyn TargetModel,
        x: &Array2<f64>,
        y: &Array2<f64>,
        rng: &mut R,
    ) -> Result<FlowResult> {
        let rows = x.nrows();
        if y.nrows() != rows {
            return Err(Error::BatchShapeMismatch {
                context: "observation batch",
                expected: rows,
                actual: y.nrows(),
            });
        }

        let latent = &self.statistics.latent;
        let log_jacobian = latent.log_jacobian();
        flow.bind_condition(self.statistics.condition.standardize(y)?)?;

        // Reverse KL: samples from the flow scored under the model
        let z0: Array2<f64> = Array2::random_using((rows, flow.dim_latent()), StandardNormal, rng);
        let evals_before = flow.num_evals();
        let sampled = flow.transform(&z0, Direction::Forward, rng)?;
        let reverse_num_evals = flow.num_evals() - evals_before;

        let x_hat = latent.destandardize(&sampled.state.position)?;
        let log_q = standard_normal_log_density(&z0) + &sampled.state.log_density_correction
            - log_jacobian;
        let log_p = joint_log_density(model, &x_hat, y)?;
        let reverse_kl_samples = log_q - log_p;

        // Forward KL: model samples scored under the flow
        let evals_before = flow.num_evals();
        let encoded = flow.transform(&latent.standardize(x)?, Direction::Reverse, rng)?;
        let forward_num_evals = flow.num_evals() - evals_before;

        let log_q = standard_normal_log_density(&encoded.state.position)
            - &encoded.state.log_density_correction
            - log_jacobian;
        let log_p = joint_log_density(model, x, y)?;
        let forward_kl_samples = log_p - log_q;

        let result = FlowResult {
            forward_kl: mean(&forward_kl_samples),
            reverse_kl: mean(&reverse_kl_samples),
            forward_reg: encoded.regularization,
            reverse_reg: sampled.regularization,
            forward_num_evals,
            reverse_num_evals,
            forward_kl_samples,
            reverse_kl_samples,
            posterior_samples: x_hat,
        };
        debug!(
            "KL estimate on {} rows: forward {:.4} ({} evals), reverse {:.4} ({} evals)",
            rows, result.forward_kl, forward_num_evals, result.reverse_kl, reverse_num_evals
        );
        Ok(result)
    }
}

/// `log_prior(x) + log_likelihood(x, y)`, checked against the batch size
fn joint_log_density(model: &dyn TargetModel, x: &Array2<f64>, y: &Array2<f64>) -> Result<Array1<f64>> {
    let rows = x.nrows();
    let prior = model.log_prior(x);
    if prior.len() != rows {
        return Err(Error::BatchShapeMismatch {
            context: "log prior",
            expected: rows,
            actual: prior.len(),
        });
    }
    let likelihood = model.log_likelihood(x, y);
    if likelihood.len() != rows {
        return Err(Error::BatchShapeMismatch {
            context: "log likelihood",
            expected: rows,
            actual: likelihood.len(),
        });
    }
    Ok(prior + likelihood)
}

fn mean(values: &Array1<f64>) -> f64 {
    values.mean().unwrap_or(0.0)
}

// ============================================================================
// Tests
// ============================================================================
