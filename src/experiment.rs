//! Experiment assembly: turns an [`ExperimentConfig`] into a ready-to-train
//! model, flow, loss estimator and trainer.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::cnf::{ContinuousFlow, FlowMode};
use crate::config::{Connectivity, ExperimentConfig};
use crate::error::{Error, Result};
use crate::loss::{DataStatistics, DualDirectionLossEstimator, FlowResult};
use crate::models::{AugmentedModel, ModelKind, TargetModel};
use crate::training::{LossChoice, MetricSink, Trainer, TrainingConfig, TrainingSummary};

/// Fully assembled experiment
pub struct Experiment {
    config: ExperimentConfig,
    model: Box<dyn TargetModel>,
    connectivity: Connectivity,
    flow: ContinuousFlow,
    estimator: DualDirectionLossEstimator,
    trainer: Trainer,
}

impl Experiment {
    /// Parse identifiers and build every component
    ///
    /// Construction is deterministic in `config.seed`.
    pub fn setup(config: &ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let kind: ModelKind = config.model.parse()?;
        let connectivity = config.connectivity()?;
        let loss_choice: LossChoice = config.loss_choice.parse()?;
        if loss_choice.requires_regularization() && config.regularization.is_empty() {
            return Err(Error::ConfigError(format!(
                "loss choice '{}' needs at least one regularization term",
                loss_choice
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut model = kind.build(&mut rng)?;
        if !config.to_augment.is_empty() {
            model = Box::new(AugmentedModel::new(model, config.to_augment.clone())?);
        }

        let statistics =
            DataStatistics::from_model(model.as_ref(), config.statistics_samples, &mut rng)?;
        let network = connectivity.build_network(model.as_ref(), config.mask_policy, &mut rng)?;
        let flow = ContinuousFlow::new(network, config.flow_config())?;
        let estimator =
            DualDirectionLossEstimator::new(statistics, config.batch_size, config.repeat_samples)?;

        let trainer = Trainer::new(TrainingConfig {
            learning_rate: config.lr,
            weight_decay: config.weight_decay,
            train_steps: config.train_steps,
            loss_choice,
            gradient: config.gradient,
            checkpoint_every: config.checkpoint_every,
            seed: rng.gen(),
        });

        info!(
            "Experiment: model {} ({} latent, {} observed), {} connectivity with {} layers, {} parameters",
            model.name(),
            model.dim_latent(),
            model.dim_condition(),
            connectivity,
            connectivity.num_layers(),
            flow.num_params()
        );

        Ok(Self {
            config: config.clone(),
            model,
            connectivity,
            flow,
            estimator,
            trainer,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn TargetModel {
        self.model.as_ref()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn flow(&self) -> &ContinuousFlow {
        &self.flow
    }

    pub fn flow_mut(&mut self) -> &mut ContinuousFlow {
        &mut self.flow
    }

    pub fn estimator(&self) -> &DualDirectionLossEstimator {
        &self.estimator
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Write checkpoints into `dir` during training
    pub fn set_checkpoint_dir(&mut self, dir: impl Into<PathBuf>) {
        self.trainer.set_checkpoint_dir(dir);
    }

    /// Train for the configured number of steps
    pub fn run(&mut self, sink: &mut dyn MetricSink) -> Result<TrainingSummary> {
        self.trainer
            .train(&mut self.flow, self.model.as_ref(), &self.estimator, sink)
    }

    /// Estimate both KL directions with the evaluation solver settings
    pub fn evaluate<R: Rng>(&mut self, rng: &mut R) -> Result<FlowResult> {
        let mode = self.flow.mode();
        self.flow.set_mode(FlowMode::Eval);
        let result = self.estimator.estimate(&mut self.flow, self.model.as_ref(), rng);
        self.flow.set_mode(mode);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::RegularizationKind;

    fn small_config(model: &str) -> ExperimentConfig {
        ExperimentConfig {
            batch_size: 4,
            train_steps: 1,
            statistics_samples: 200,
            ..ExperimentConfig::for_model(model)
        }
    }

    #[test]
    fn test_unknown_identifiers_rejected() {
        let config = small_config("toy_data");
        assert!(matches!(Experiment::setup(&config), Err(Error::UnknownModel(_))));

        let config = ExperimentConfig {
            connectivity: "ffjord_baseline".to_string(),
            ..small_config("circle")
        };
        assert!(matches!(
            Experiment::setup(&config),
            Err(Error::UnknownConnectivity(_))
        ));

        let config = ExperimentConfig {
            loss_choice: "elbo".to_string(),
            ..small_config("circle")
        };
        assert!(matches!(
            Experiment::setup(&config),
            Err(Error::UnknownLossChoice(_))
        ));
    }

    #[test]
    fn test_regularized_loss_needs_terms() {
        let config = ExperimentConfig {
            loss_choice: "sym_reg".to_string(),
            ..small_config("circle")
        };
        assert!(matches!(Experiment::setup(&config), Err(Error::ConfigError(_))));

        let config = ExperimentConfig {
            regularization: vec![RegularizationKind::DirectionChange],
            ..config
        };
        assert!(Experiment::setup(&config).is_ok());
    }

    #[test]
    fn test_augmented_setup() {
        let config = ExperimentConfig {
            to_augment: vec![0, 2],
            connectivity: "faithful".to_string(),
            ..small_config("state_space")
        };
        let experiment = Experiment::setup(&config).unwrap();
        assert_eq!(experiment.model().dim_latent(), 6);
        assert_eq!(experiment.flow().dim_latent(), 6);
        assert_eq!(experiment.estimator().statistics().latent.dim(), 6);
    }

    #[test]
    fn test_setup_is_deterministic() {
        let config = small_config("bigger_graph1");
        let a = Experiment::setup(&config).unwrap();
        let b = Experiment::setup(&config).unwrap();
        assert_eq!(a.flow().get_params(), b.flow().get_params());
        assert_eq!(a.model().rand_adjacency(), b.model().rand_adjacency());
    }
}
