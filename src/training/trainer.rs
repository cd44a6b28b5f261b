//! # Training Loop
//!
//! Optimizes the flow parameters against one of the KL objectives.
//!
//! Each step draws a step seed. Every loss evaluation of the step reseeds
//! its batch and probe generator from it, so the objective is a
//! deterministic function of the parameters while the gradient is
//! estimated.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::checkpoint::FlowCheckpoint;
use super::gradient::GradientEstimator;
use super::metrics::MetricSink;
use super::optimizer::Adam;
use crate::cnf::{ContinuousFlow, FlowMode};
use crate::config::{DEFAULT_CHECKPOINT_EVERY, DEFAULT_LEARNING_RATE, DEFAULT_WEIGHT_DECAY};
use crate::error::{Error, Result};
use crate::loss::{DualDirectionLossEstimator, FlowResult};
use crate::models::TargetModel;

/// Decay of the moving symmetric KL
const MOVING_AVERAGE_DECAY: f64 = 0.95;
/// Lower bound of the moving symmetric KL
const MOVING_AVERAGE_FLOOR: f64 = 1e-5;

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossChoice {
    /// Forward KL only
    Forward,
    /// Reverse KL only
    Backward,
    /// Forward plus reverse KL
    Sym,
    /// Symmetric KL plus the first reverse-branch regularizer
    SymReg,
    /// Forward KL plus the first reverse-branch regularizer
    ForwReg,
    /// First reverse-branch regularizer only
    RegOnly,
}

impl LossChoice {
    pub const ALL: [LossChoice; 6] = [
        LossChoice::Forward,
        LossChoice::Backward,
        LossChoice::Sym,
        LossChoice::SymReg,
        LossChoice::ForwReg,
        LossChoice::RegOnly,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            LossChoice::Forward => "forward",
            LossChoice::Backward => "backward",
            LossChoice::Sym => "sym",
            LossChoice::SymReg => "sym_reg",
            LossChoice::ForwReg => "forw_reg",
            LossChoice::RegOnly => "reg_only",
        }
    }

    pub fn requires_regularization(&self) -> bool {
        matches!(
            self,
            LossChoice::SymReg | LossChoice::ForwReg | LossChoice::RegOnly
        )
    }

    /// Scalar objective of one estimate
    pub fn objective(&self, result: &FlowResult) -> Result<f64> {
        let regularizer = || {
            result.reverse_reg.first().map(|state| state.value).ok_or_else(|| {
                Error::ConfigError(format!(
                    "loss choice '{}' needs at least one regularization term",
                    self.identifier()
                ))
            })
        };

        let objective = match self {
            LossChoice::Forward => result.forward_kl,
            LossChoice::Backward => result.reverse_kl,
            LossChoice::Sym => result.forward_kl + result.reverse_kl,
            LossChoice::SymReg => result.forward_kl + result.reverse_kl + regularizer()?,
            LossChoice::ForwReg => result.forward_kl + regularizer()?,
            LossChoice::RegOnly => regularizer()?,
        };
        Ok(objective)
    }
}

impl FromStr for LossChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LossChoice::ALL
            .iter()
            .copied()
            .find(|choice| choice.identifier() == s)
            .ok_or_else(|| Error::UnknownLossChoice(s.to_string()))
    }
}

impl fmt::Display for LossChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Piecewise-constant learning rate decay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    /// `(step, factor)`: the rate is multiplied by `factor` when `step` starts
    pub milestones: Vec<(usize, f64)>,
}

impl LearningRateSchedule {
    /// ×0.1 at 50 %, ×0.1 at 80 % and ×0.5 at 95 % of the run
    pub fn step_decay(train_steps: usize) -> Self {
        let at = |fraction: f64| (fraction * train_steps as f64) as usize;
        Self {
            milestones: vec![(at(0.5), 0.1), (at(0.8), 0.1), (at(0.95), 0.5)],
        }
    }

    pub fn constant() -> Self {
        Self {
            milestones: Vec::new(),
        }
    }

    /// Combined factor of the milestones at `step`, if any
    pub fn factor_at(&self, step: usize) -> Option<f64> {
        self.milestones
            .iter()
            .filter(|(at, _)| *at == step)
            .map(|(_, factor)| *factor)
            .reduce(|a, b| a * b)
    }
}

/// Training configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    /// Coupled L2 weight decay
    pub weight_decay: f64,
    pub train_steps: usize,
    pub loss_choice: LossChoice,
    pub gradient: GradientEstimator,
    /// Checkpoint interval in steps, `0` disables periodic checkpoints
    pub checkpoint_every: usize,
    /// Seeds the per-step seeds and the perturbation directions
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            train_steps: 10,
            loss_choice: LossChoice::Forward,
            gradient: GradientEstimator::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            seed: 0,
        }
    }
}

/// Outcome of one training step
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: usize,
    /// Estimate at the parameters before the update
    pub result: FlowResult,
    pub objective: f64,
    pub gradient_norm: f64,
    /// Dynamics evaluations spent estimating the gradient
    pub gradient_num_evals: u64,
    pub moving_sym_kl: f64,
    pub learning_rate: f64,
    pub checkpoint: Option<PathBuf>,
}

/// Final state of a training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub steps: usize,
    pub forward_kl: f64,
    pub reverse_kl: f64,
    pub moving_sym_kl: f64,
    pub final_checkpoint: Option<PathBuf>,
}

/// Drives the optimization of a flow
pub struct Trainer {
    config: TrainingConfig,
    optimizer: Adam,
    schedule: LearningRateSchedule,
    rng: StdRng,
    step: usize,
    moving_sym_kl: Option<f64>,
    checkpoint_dir: Option<PathBuf>,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig) -> Self {
        let optimizer = Adam::new(config.learning_rate).with_weight_decay(config.weight_decay);
        Self {
            schedule: LearningRateSchedule::step_decay(config.train_steps),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            optimizer,
            step: 0,
            moving_sym_kl: None,
            checkpoint_dir: None,
        }
    }

    pub fn with_schedule(mut self, schedule: LearningRateSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Write checkpoints into `dir`
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.set_checkpoint_dir(dir);
        self
    }

    pub fn set_checkpoint_dir(&mut self, dir: impl Into<PathBuf>) {
        self.checkpoint_dir = Some(dir.into());
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Steps completed so far
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate
    }

    pub fn moving_sym_kl(&self) -> Option<f64> {
        self.moving_sym_kl
    }

    /// Run one optimization step
    pub fn step(
        &mut self,
        flow: &mut ContinuousFlow,
        model: &dyn TargetModel,
        estimator: &DualDirectionLossEstimator,
        sink: &mut dyn MetricSink,
    ) -> Result<StepReport> {
        let step = self.step;
        if let Some(factor) = self.schedule.factor_at(step) {
            self.optimizer.learning_rate *= factor;
            sink.log_scalar("learning_rate", self.optimizer.learning_rate, Some(step));
            info!("Step {}: learning rate set to {:e}", step, self.optimizer.learning_rate);
        }

        let step_seed: u64 = self.rng.gen();
        let loss_choice = self.config.loss_choice;
        let original = flow.get_params();

        let result = estimator.estimate(flow, model, &mut StdRng::seed_from_u64(step_seed))?;
        let objective = loss_choice.objective(&result)?;

        let evals_before = flow.num_evals();
        let estimate = self.config.gradient.estimate(
            &Array1::from(original.clone()),
            &mut self.rng,
            |params| {
                flow.set_params(&params.to_vec())?;
                let mut rng = StdRng::seed_from_u64(step_seed);
                let perturbed = estimator.estimate(flow, model, &mut rng)?;
                loss_choice.objective(&perturbed)
            },
        );
        flow.set_params(&original)?;
        let estimate = estimate?;
        let gradient_num_evals = flow.num_evals() - evals_before;

        let sym_kl = result.sym_kl();
        let moving_sym_kl = match self.moving_sym_kl {
            None => sym_kl,
            Some(previous) => (MOVING_AVERAGE_DECAY * previous + (1.0 - MOVING_AVERAGE_DECAY) * sym_kl)
                .max(MOVING_AVERAGE_FLOOR),
        };
        self.moving_sym_kl = Some(moving_sym_kl);

        for (name, value) in result.scalars() {
            sink.log_scalar(&name, value, Some(step));
        }
        sink.log_scalar("gradient_solver_evals", gradient_num_evals as f64, Some(step));
        sink.log_scalar("moving_sym_kl", moving_sym_kl, Some(step));

        let checkpoint = match &self.checkpoint_dir {
            Some(dir) if self.config.checkpoint_every > 0 && step % self.config.checkpoint_every == 0 => {
                Some(FlowCheckpoint::from_flow(flow, Some(step)).save_in(dir)?)
            }
            _ => None,
        };

        let mut params = Array1::from(original);
        self.optimizer.step(&mut params, &estimate.gradient);
        flow.set_params(&params.to_vec())?;
        self.step += 1;

        let gradient_norm = estimate.gradient.dot(&estimate.gradient).sqrt();
        info!(
            "Step {}: forward_kl = {:.4}, reverse_kl = {:.4}, objective = {:.4}, |grad| = {:.4}, evals {}/{}/{}",
            step,
            result.forward_kl,
            result.reverse_kl,
            objective,
            gradient_norm,
            result.forward_num_evals,
            result.reverse_num_evals,
            gradient_num_evals
        );

        Ok(StepReport {
            step,
            result,
            objective,
            gradient_norm,
            gradient_num_evals,
            moving_sym_kl,
            learning_rate: self.optimizer.learning_rate,
            checkpoint,
        })
    }

    /// Run the remaining steps and write the final checkpoint
    pub fn train(
        &mut self,
        flow: &mut ContinuousFlow,
        model: &dyn TargetModel,
        estimator: &DualDirectionLossEstimator,
        sink: &mut dyn MetricSink,
    ) -> Result<TrainingSummary> {
        flow.set_mode(FlowMode::Train);
        info!(
            "Training {} parameters on {} for {} steps ({} loss)",
            flow.num_params(),
            model.name(),
            self.config.train_steps,
            self.config.loss_choice
        );

        let mut last = None;
        while self.step < self.config.train_steps {
            last = Some(self.step(flow, model, estimator, sink)?);
        }

        let final_checkpoint = match &self.checkpoint_dir {
            Some(dir) => Some(FlowCheckpoint::from_flow(flow, None).save_in(dir)?),
            None => None,
        };

        let (forward_kl, reverse_kl) = last
            .as_ref()
            .map_or((f64::NAN, f64::NAN), |r| (r.result.forward_kl, r.result.reverse_kl));
        Ok(TrainingSummary {
            steps: self.step,
            forward_kl,
            reverse_kl,
            moving_sym_kl: self.moving_sym_kl.unwrap_or(f64::NAN),
            final_checkpoint,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::{DynamicsNetwork, FlowConfig, RegularizationKind, RegularizationState};
    use crate::loss::DataStatistics;
    use crate::models::SineModel;
    use crate::training::MemorySink;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn result_with(forward: f64, reverse: f64, reg: Vec<RegularizationState>) -> FlowResult {
        FlowResult {
            forward_kl: forward,
            reverse_kl: reverse,
            forward_reg: Vec::new(),
            reverse_reg: reg,
            forward_num_evals: 0,
            reverse_num_evals: 0,
            forward_kl_samples: array![forward],
            reverse_kl_samples: array![reverse],
            posterior_samples: array![[0.0]],
        }
    }

    fn sine_setup(regularization: Vec<RegularizationKind>) -> (SineModel, ContinuousFlow, DualDirectionLossEstimator) {
        let model = SineModel::new().unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let statistics = DataStatistics::from_model(&model, 500, &mut rng).unwrap();
        let estimator = DualDirectionLossEstimator::new(statistics, 8, 1).unwrap();
        let network = DynamicsNetwork::dense(1, 1, 2, &mut rng).unwrap();
        let config = FlowConfig {
            regularization,
            ..FlowConfig::default()
        };
        (model, ContinuousFlow::new(network, config).unwrap(), estimator)
    }

    #[test]
    fn test_loss_choice_identifiers() {
        for choice in LossChoice::ALL {
            assert_eq!(choice.identifier().parse::<LossChoice>().unwrap(), choice);
        }
        assert!(matches!(
            "kl".parse::<LossChoice>(),
            Err(Error::UnknownLossChoice(_))
        ));
    }

    #[test]
    fn test_objectives() {
        let reg = vec![RegularizationState {
            kind: RegularizationKind::DirectionChange,
            value: 0.5,
        }];
        let result = result_with(2.0, 3.0, reg);
        assert_eq!(LossChoice::Forward.objective(&result).unwrap(), 2.0);
        assert_eq!(LossChoice::Backward.objective(&result).unwrap(), 3.0);
        assert_eq!(LossChoice::Sym.objective(&result).unwrap(), 5.0);
        assert_eq!(LossChoice::SymReg.objective(&result).unwrap(), 5.5);
        assert_eq!(LossChoice::ForwReg.objective(&result).unwrap(), 2.5);
        assert_eq!(LossChoice::RegOnly.objective(&result).unwrap(), 0.5);

        let unregularized = result_with(2.0, 3.0, Vec::new());
        assert!(LossChoice::SymReg.objective(&unregularized).is_err());
        assert!(LossChoice::Sym.objective(&unregularized).is_ok());
    }

    #[test]
    fn test_schedule_milestones() {
        let schedule = LearningRateSchedule::step_decay(10);
        assert_eq!(schedule.factor_at(0), None);
        assert_eq!(schedule.factor_at(5), Some(0.1));
        assert_eq!(schedule.factor_at(8), Some(0.1));
        assert_eq!(schedule.factor_at(9), Some(0.5));

        // Coinciding milestones compound
        let short = LearningRateSchedule::step_decay(1);
        assert_abs_diff_eq!(short.factor_at(0).unwrap(), 0.005, epsilon = 1e-15);
    }

    #[test]
    fn test_training_run_logs_and_checkpoints() {
        let (model, mut flow, estimator) = sine_setup(Vec::new());
        let dir = tempdir().unwrap();
        let config = TrainingConfig {
            train_steps: 3,
            checkpoint_every: 2,
            ..TrainingConfig::default()
        };
        let mut trainer = Trainer::new(config).with_checkpoint_dir(dir.path());
        let mut sink = MemorySink::new();
        let before = flow.get_params();

        let summary = trainer.train(&mut flow, &model, &estimator, &mut sink).unwrap();
        assert_eq!(summary.steps, 3);
        assert!(summary.forward_kl.is_finite());
        assert!(summary.moving_sym_kl >= MOVING_AVERAGE_FLOOR);
        assert_ne!(flow.get_params(), before);

        assert_eq!(sink.series("forward_kl").len(), 3);
        assert_eq!(sink.series("moving_sym_kl").len(), 3);
        assert!(sink.series("gradient_solver_evals").iter().all(|&(_, v)| v > 0.0));
        assert_eq!(sink.series("learning_rate").len(), 2);

        assert!(dir.path().join("0_flow.json").exists());
        assert!(dir.path().join("2_flow.json").exists());
        assert!(!dir.path().join("1_flow.json").exists());
        assert_eq!(summary.final_checkpoint, Some(dir.path().join("final_flow.json")));
        assert!(dir.path().join("final_flow.json").exists());
    }

    #[test]
    fn test_moving_average_starts_at_first_value() {
        let (model, mut flow, estimator) = sine_setup(Vec::new());
        let mut trainer = Trainer::new(TrainingConfig::default());
        let mut sink = MemorySink::new();

        let first = trainer.step(&mut flow, &model, &estimator, &mut sink).unwrap();
        assert_abs_diff_eq!(first.moving_sym_kl, first.result.sym_kl(), epsilon = 1e-12);
        let second = trainer.step(&mut flow, &model, &estimator, &mut sink).unwrap();
        let expected = (0.95 * first.moving_sym_kl + 0.05 * second.result.sym_kl()).max(1e-5);
        assert_abs_diff_eq!(second.moving_sym_kl, expected, epsilon = 1e-12);
        assert_eq!(trainer.current_step(), 2);
    }

    #[test]
    fn test_regularized_loss_without_terms_fails() {
        let (model, mut flow, estimator) = sine_setup(Vec::new());
        let config = TrainingConfig {
            loss_choice: LossChoice::RegOnly,
            ..TrainingConfig::default()
        };
        let mut trainer = Trainer::new(config);
        let mut sink = MemorySink::new();
        let before = flow.get_params();
        assert!(trainer.step(&mut flow, &model, &estimator, &mut sink).is_err());
        assert_eq!(flow.get_params(), before);
    }
}
