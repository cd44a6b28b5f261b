//! # Continuous Flow
//!
//! Invertible transform defined by integrating the augmented dynamics over
//! `[0, T]`. The forward direction maps base samples to latent space, the
//! reverse direction maps latent samples back to the base.
//!
//! Both directions integrate in solver time `s ∈ [0, T]`. The reverse
//! direction evaluates the network at `t = T − s` with negated velocity, so
//! the log-density correction of a reverse pass is the negative of the
//! forward pass over the same path.

use std::collections::BTreeMap;

use ndarray::{s, Array1, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dynamics::{DivergenceEstimator, OdeDynamicsFunction};
use super::network::DynamicsNetwork;
use super::ode_solver::{Dopri5Solver, OdeFunc, SolverConfig};
use super::regularization::{RegularizationKind, RegularizationState, RegularizationTracker};
use crate::config::{DEFAULT_TIME_LENGTH, DEFAULT_TOLERANCE};
use crate::error::{Error, Result};

/// Integration direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Base distribution to latent space (`t: 0 → T`)
    Forward,
    /// Latent space to base distribution (`t: T → 0`)
    Reverse,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

/// Selects which solver configuration an integration uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    Train,
    Eval,
}

/// Immutable flow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Initial integration length `T`
    pub time_length: f64,
    /// Whether `T` is a trainable parameter
    pub train_time_length: bool,
    pub train_solver: SolverConfig,
    pub eval_solver: SolverConfig,
    pub divergence: DivergenceEstimator,
    pub regularization: Vec<RegularizationKind>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            time_length: DEFAULT_TIME_LENGTH,
            train_time_length: true,
            train_solver: SolverConfig::with_tolerance(DEFAULT_TOLERANCE),
            eval_solver: SolverConfig::with_tolerance(DEFAULT_TOLERANCE),
            divergence: DivergenceEstimator::Gaussian,
            regularization: Vec::new(),
        }
    }
}

/// Standardized condition batch bound to the flow
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionBuffer {
    values: Array2<f64>,
}

impl ConditionBuffer {
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn batch_size(&self) -> usize {
        self.values.nrows()
    }
}

/// Augmented state at the end of an integration
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    /// Position in the target space of the integration, `(batch, L)`
    pub position: Array2<f64>,
    /// Net change of log-density, `(batch,)`
    pub log_density_correction: Array1<f64>,
    /// Accumulated regularization channels, `(batch, k)`
    pub regularization: Array2<f64>,
}

impl FlowState {
    /// Fresh state with zero correction and zero accumulators
    pub fn initial(position: &Array2<f64>, num_regularization: usize) -> Self {
        let batch = position.nrows();
        Self {
            position: position.clone(),
            log_density_correction: Array1::zeros(batch),
            regularization: Array2::zeros((batch, num_regularization)),
        }
    }

    fn to_augmented(&self) -> Array2<f64> {
        let l = self.position.ncols();
        let k = self.regularization.ncols();
        let mut augmented = Array2::zeros((self.position.nrows(), l + 1 + k));
        augmented.slice_mut(s![.., ..l]).assign(&self.position);
        augmented.column_mut(l).assign(&self.log_density_correction);
        augmented.slice_mut(s![.., l + 1..]).assign(&self.regularization);
        augmented
    }

    fn from_augmented(augmented: &Array2<f64>, dim_latent: usize) -> Self {
        Self {
            position: augmented.slice(s![.., ..dim_latent]).to_owned(),
            log_density_correction: augmented.column(dim_latent).to_owned(),
            regularization: augmented.slice(s![.., dim_latent + 1..]).to_owned(),
        }
    }
}

/// Result of one integration call
#[derive(Debug, Clone)]
pub struct FlowOutput {
    pub state: FlowState,
    /// Batch means of the regularization channels
    pub regularization: Vec<RegularizationState>,
    /// Dynamics evaluations spent by this call
    pub evaluations: u64,
    pub direction: Direction,
}

/// One recorded dynamics evaluation
#[derive(Debug, Clone)]
pub struct TrajectoryPoint {
    /// Physical network time
    pub time: f64,
    pub position: Array2<f64>,
    /// Signed velocity
    pub velocity: Array2<f64>,
}

/// Continuous normalizing flow
#[derive(Debug, Clone)]
pub struct ContinuousFlow {
    dynamics: OdeDynamicsFunction,
    config: FlowConfig,
    sqrt_end_time: f64,
    mode: FlowMode,
    condition: Option<ConditionBuffer>,
    num_evals: u64,
    regularization_states: Vec<RegularizationState>,
    trajectory: Option<Vec<TrajectoryPoint>>,
}

/// Counting adapter between the solver and the dynamics function
struct AugmentedOde<'a> {
    dynamics: &'a OdeDynamicsFunction,
    condition: ArrayView2<'a, f64>,
    probe: &'a Array2<f64>,
    sign: f64,
    end_time: f64,
    evaluations: u64,
    trajectory: Option<&'a mut Vec<TrajectoryPoint>>,
}

impl OdeFunc for AugmentedOde<'_> {
    fn evaluate(&mut self, y: &Array2<f64>, s: f64) -> Array2<f64> {
        self.evaluations += 1;
        let t = if self.sign > 0.0 { s } else { self.end_time - s };
        let (derivative, velocity) =
            self.dynamics
                .augmented_derivative(t, self.sign, y, self.condition, self.probe);

        if let Some(trajectory) = self.trajectory.as_deref_mut() {
            let l = self.dynamics.dim_latent();
            trajectory.push(TrajectoryPoint {
                time: t,
                position: y.slice(s![.., ..l]).to_owned(),
                velocity,
            });
        }
        derivative
    }
}

impl ContinuousFlow {
    pub fn new(network: DynamicsNetwork, config: FlowConfig) -> Result<Self> {
        if !(config.time_length > 0.0 && config.time_length.is_finite()) {
            return Err(Error::ConfigError(format!(
                "integration length must be positive, got {}",
                config.time_length
            )));
        }

        let dynamics = OdeDynamicsFunction::new(
            network,
            config.divergence,
            RegularizationTracker::new(config.regularization.clone()),
        );

        Ok(Self {
            dynamics,
            sqrt_end_time: config.time_length.sqrt(),
            config,
            mode: FlowMode::Train,
            condition: None,
            num_evals: 0,
            regularization_states: Vec::new(),
            trajectory: None,
        })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn dynamics(&self) -> &OdeDynamicsFunction {
        &self.dynamics
    }

    pub fn network(&self) -> &DynamicsNetwork {
        self.dynamics.network()
    }

    pub fn dim_latent(&self) -> usize {
        self.dynamics.network().dim_latent()
    }

    pub fn dim_condition(&self) -> usize {
        self.dynamics.network().dim_condition()
    }

    /// Integration length `T`
    pub fn end_time(&self) -> f64 {
        self.sqrt_end_time * self.sqrt_end_time
    }

    pub fn set_end_time(&mut self, end_time: f64) {
        self.sqrt_end_time = end_time.max(0.0).sqrt();
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FlowMode) {
        self.mode = mode;
    }

    /// Bind the standardized condition batch for the next integrations
    pub fn bind_condition(&mut self, condition: Array2<f64>) -> Result<()> {
        if condition.ncols() != self.dim_condition() {
            return Err(Error::DimensionMismatch {
                context: "condition buffer",
                expected: self.dim_condition(),
                actual: condition.ncols(),
            });
        }
        self.condition = Some(ConditionBuffer { values: condition });
        Ok(())
    }

    pub fn condition(&self) -> Option<&ConditionBuffer> {
        self.condition.as_ref()
    }

    /// Total dynamics evaluations since construction
    pub fn num_evals(&self) -> u64 {
        self.num_evals
    }

    /// Regularization states of the most recent integration
    pub fn regularization_states(&self) -> &[RegularizationState] {
        &self.regularization_states
    }

    /// Record every following dynamics evaluation
    pub fn start_recording(&mut self) {
        self.trajectory = Some(Vec::new());
    }

    /// Stop recording and hand out what was recorded
    pub fn take_recording(&mut self) -> Vec<TrajectoryPoint> {
        self.trajectory.take().unwrap_or_default()
    }

    /// Integrate `x` in the given direction
    ///
    /// The probe for the divergence estimator is drawn from `rng` once and
    /// held fixed for the whole call.
    pub fn transform<R: Rng + ?Sized>(
        &mut self,
        x: &Array2<f64>,
        direction: Direction,
        rng: &mut R,
    ) -> Result<FlowOutput> {
        let dim_latent = self.dim_latent();
        if x.ncols() != dim_latent {
            return Err(Error::DimensionMismatch {
                context: "flow input",
                expected: dim_latent,
                actual: x.ncols(),
            });
        }

        let batch = x.nrows();
        let unconditioned;
        let condition = match &self.condition {
            Some(buffer) => buffer.values.view(),
            None if self.dim_condition() == 0 => {
                unconditioned = Array2::zeros((batch, 0));
                unconditioned.view()
            }
            None => return Err(Error::ConditionNotBound),
        };
        if condition.nrows() != batch {
            return Err(Error::BatchShapeMismatch {
                context: "condition buffer",
                expected: batch,
                actual: condition.nrows(),
            });
        }

        let probe = self.dynamics.draw_probe(batch, rng);
        let solver_config = match self.mode {
            FlowMode::Train => self.config.train_solver,
            FlowMode::Eval => self.config.eval_solver,
        };
        let end_time = self.sqrt_end_time * self.sqrt_end_time;
        let initial = FlowState::initial(x, self.dynamics.regularization().len());

        let mut ode = AugmentedOde {
            dynamics: &self.dynamics,
            condition,
            probe: &probe,
            sign: direction.sign(),
            end_time,
            evaluations: 0,
            trajectory: self.trajectory.as_mut(),
        };
        let outcome = Dopri5Solver::new(solver_config).integrate(&mut ode, initial.to_augmented(), (0.0, end_time));
        let evaluations = ode.evaluations;
        self.num_evals += evaluations;
        let (augmented, stats) = outcome?;

        let state = FlowState::from_augmented(&augmented, dim_latent);
        let regularization = self
            .dynamics
            .regularization()
            .states(state.regularization.view());
        self.regularization_states = regularization.clone();

        debug!(
            "{:?} integration over [0, {:.4}]: {} steps, {} evaluations",
            direction, end_time, stats.accepted_steps, evaluations
        );

        Ok(FlowOutput {
            state,
            regularization,
            evaluations,
            direction,
        })
    }

    /// Trainable parameter count (network plus optional `sqrt(T)`)
    pub fn num_params(&self) -> usize {
        self.network().num_params() + usize::from(self.config.train_time_length)
    }

    pub fn get_params(&self) -> Vec<f64> {
        let mut params = self.network().get_params();
        if self.config.train_time_length {
            params.push(self.sqrt_end_time);
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
        let network_len = self.network().num_params();
        self.dynamics.network_mut().set_params(&params[..network_len])?;
        if self.config.train_time_length {
            self.sqrt_end_time = params[network_len];
        }
        Ok(())
    }

    /// Parameters keyed by layer name
    pub fn named_params(&self) -> BTreeMap<String, Vec<f64>> {
        let mut params = BTreeMap::new();
        self.network().named_params(&mut params);
        params.insert("sqrt_end_time".to_string(), vec![self.sqrt_end_time]);
        params
    }

    pub fn load_named_params(&mut self, params: &BTreeMap<String, Vec<f64>>) -> Result<()> {
        self.dynamics.network_mut().load_named_params(params)?;
        let sqrt_end_time = params
            .get("sqrt_end_time")
            .and_then(|v| v.first())
            .ok_or_else(|| Error::MissingParameter("sqrt_end_time".to_string()))?;
        self.sqrt_end_time = *sqrt_end_time;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::StandardNormal;
    use ndarray_rand::RandomExt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_flow(regularization: Vec<RegularizationKind>) -> ContinuousFlow {
        let mut rng = StdRng::seed_from_u64(42);
        let network = DynamicsNetwork::dense(2, 1, 3, &mut rng).unwrap();
        let config = FlowConfig {
            regularization,
            ..FlowConfig::default()
        };
        ContinuousFlow::new(network, config).unwrap()
    }

    #[test]
    fn test_requires_condition() {
        let mut flow = small_flow(Vec::new());
        let mut rng = StdRng::seed_from_u64(0);
        let x = Array2::zeros((3, 2));
        let result = flow.transform(&x, Direction::Forward, &mut rng);
        assert!(matches!(result, Err(Error::ConditionNotBound)));
    }

    #[test]
    fn test_condition_batch_checked() {
        let mut flow = small_flow(Vec::new());
        let mut rng = StdRng::seed_from_u64(0);
        flow.bind_condition(Array2::zeros((4, 1))).unwrap();
        let result = flow.transform(&Array2::zeros((3, 2)), Direction::Forward, &mut rng);
        assert!(matches!(result, Err(Error::BatchShapeMismatch { .. })));
        assert!(flow.bind_condition(Array2::zeros((4, 2))).is_err());
    }

    #[test]
    fn test_counter_accumulates() {
        let mut flow = small_flow(Vec::new());
        let mut rng = StdRng::seed_from_u64(1);
        let x: Array2<f64> = Array2::random_using((5, 2), StandardNormal, &mut rng);
        flow.bind_condition(Array2::random_using((5, 1), StandardNormal, &mut rng))
            .unwrap();

        let before = flow.num_evals();
        let first = flow.transform(&x, Direction::Forward, &mut rng).unwrap();
        let second = flow.transform(&x, Direction::Reverse, &mut rng).unwrap();

        assert!(first.evaluations > 0);
        assert!(second.evaluations > 0);
        assert_eq!(flow.num_evals(), before + first.evaluations + second.evaluations);
    }

    #[test]
    fn test_end_time_parameter() {
        let mut flow = small_flow(Vec::new());
        assert_abs_diff_eq!(flow.end_time(), 1.0, epsilon = 1e-12);

        let mut params = flow.get_params();
        assert_eq!(params.len(), flow.num_params());
        *params.last_mut().unwrap() = 1.5;
        flow.set_params(&params).unwrap();
        assert_abs_diff_eq!(flow.end_time(), 2.25, epsilon = 1e-12);
    }

    #[test]
    fn test_regularization_states_reported() {
        let mut flow = small_flow(vec![RegularizationKind::ArcLength, RegularizationKind::DirectionChange]);
        let mut rng = StdRng::seed_from_u64(2);
        let x: Array2<f64> = Array2::random_using((4, 2), StandardNormal, &mut rng);
        flow.bind_condition(Array2::zeros((4, 1))).unwrap();

        let out = flow.transform(&x, Direction::Reverse, &mut rng).unwrap();
        assert_eq!(out.regularization.len(), 2);
        assert_eq!(out.regularization[0].kind, RegularizationKind::ArcLength);
        assert!(out.regularization.iter().all(|r| r.value >= 0.0));
        assert_eq!(flow.regularization_states(), out.regularization.as_slice());
    }

    #[test]
    fn test_trajectory_recording() {
        let mut flow = small_flow(Vec::new());
        let mut rng = StdRng::seed_from_u64(3);
        flow.bind_condition(Array2::zeros((2, 1))).unwrap();

        flow.start_recording();
        let out = flow
            .transform(&Array2::zeros((2, 2)), Direction::Forward, &mut rng)
            .unwrap();
        let points = flow.take_recording();
        assert_eq!(points.len() as u64, out.evaluations);
        assert!(flow.take_recording().is_empty());
    }

    #[test]
    fn test_named_params_roundtrip() {
        let flow = small_flow(Vec::new());
        let named = flow.named_params();
        assert!(named.contains_key("layers.0.hyper_gate.weight"));
        assert!(named.contains_key("sqrt_end_time"));

        let mut other = small_flow(Vec::new());
        other.set_end_time(4.0);
        other.load_named_params(&named).unwrap();
        assert_eq!(other.get_params(), flow.get_params());
    }
}
