//! Experiment configuration
//!
//! All settings of a training run live in [`ExperimentConfig`], which is
//! stored as JSON. Model, connectivity and loss identifiers stay plain
//! strings here and are parsed when the experiment is set up.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cnf::{
    DivergenceEstimator, DynamicsNetwork, FlowConfig, MaskPolicy, RegularizationKind, SolverConfig,
};
use crate::error::{Error, Result};
use crate::models::TargetModel;
use crate::training::GradientEstimator;

/// Default absolute and relative solver tolerance
pub const DEFAULT_TOLERANCE: f64 = 1e-5;
/// Default integration length `T`
pub const DEFAULT_TIME_LENGTH: f64 = 1.0;
pub const DEFAULT_LEARNING_RATE: f64 = 1e-2;
pub const DEFAULT_WEIGHT_DECAY: f64 = 1e-5;
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Samples drawn to fit the standardization statistics
pub const DEFAULT_STATISTICS_SAMPLES: usize = 10_000;
pub const DEFAULT_CHECKPOINT_EVERY: usize = 500;

/// Velocity network structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// Dense network, no mask
    FullyConnected,
    /// Masked with the model's true structure
    Faithful,
    /// Faithful mask, deeper network
    FaithfulLarge,
    /// Faithful mask, shallow network
    FaithfulSmall,
    /// Masked with a random structure of the same size
    RandomSparse,
}

impl Connectivity {
    pub const ALL: [Connectivity; 5] = [
        Connectivity::FullyConnected,
        Connectivity::Faithful,
        Connectivity::FaithfulLarge,
        Connectivity::FaithfulSmall,
        Connectivity::RandomSparse,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            Connectivity::FullyConnected => "fully_connected",
            Connectivity::Faithful => "faithful",
            Connectivity::FaithfulLarge => "faithful_large",
            Connectivity::FaithfulSmall => "faithful_small",
            Connectivity::RandomSparse => "random_sparse",
        }
    }

    pub fn num_layers(&self) -> usize {
        match self {
            Connectivity::FaithfulLarge => 8,
            Connectivity::FaithfulSmall => 2,
            _ => 4,
        }
    }

    pub fn is_masked(&self) -> bool {
        !matches!(self, Connectivity::FullyConnected)
    }

    /// Build the velocity network for `model`
    pub fn build_network<R: Rng + ?Sized>(
        &self,
        model: &dyn TargetModel,
        policy: MaskPolicy,
        rng: &mut R,
    ) -> Result<DynamicsNetwork> {
        match self {
            Connectivity::FullyConnected => DynamicsNetwork::dense(
                model.dim_latent(),
                model.dim_condition(),
                self.num_layers(),
                rng,
            ),
            Connectivity::RandomSparse => {
                DynamicsNetwork::masked(model.rand_adjacency(), self.num_layers(), policy, rng)
            }
            _ => DynamicsNetwork::masked(model.faithful_adjacency(), self.num_layers(), policy, rng),
        }
    }
}

impl FromStr for Connectivity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Connectivity::ALL
            .iter()
            .copied()
            .find(|c| c.identifier() == s)
            .ok_or_else(|| Error::UnknownConnectivity(s.to_string()))
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Complete configuration of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Adam learning rate
    pub lr: f64,
    /// L2 weight decay
    pub weight_decay: f64,
    /// Number of optimizer steps
    pub train_steps: usize,
    pub batch_size: usize,
    /// Target model identifier
    pub model: String,
    /// Network structure identifier
    pub connectivity: String,
    /// Training objective identifier
    pub loss_choice: String,
    /// Samples per drawn observation
    pub repeat_samples: usize,
    /// Initial integration length
    pub time_length: f64,
    pub train_time_length: bool,
    /// Latent dimensions to augment, one extra dimension each
    pub to_augment: Vec<usize>,
    /// Absolute and relative solver tolerance
    pub tolerance: f64,
    pub statistics_samples: usize,
    pub checkpoint_every: usize,
    pub seed: u64,
    pub mask_policy: MaskPolicy,
    pub divergence: DivergenceEstimator,
    pub regularization: Vec<RegularizationKind>,
    pub gradient: GradientEstimator,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            lr: DEFAULT_LEARNING_RATE,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            train_steps: 10,
            batch_size: DEFAULT_BATCH_SIZE,
            model: "gaussian_bn".to_string(),
            connectivity: "fully_connected".to_string(),
            loss_choice: "forward".to_string(),
            repeat_samples: 1,
            time_length: DEFAULT_TIME_LENGTH,
            train_time_length: true,
            to_augment: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
            statistics_samples: DEFAULT_STATISTICS_SAMPLES,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            seed: 0,
            mask_policy: MaskPolicy::default(),
            divergence: DivergenceEstimator::default(),
            regularization: Vec::new(),
            gradient: GradientEstimator::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration for a given model
    pub fn for_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn connectivity(&self) -> Result<Connectivity> {
        self.connectivity.parse()
    }

    /// Flow settings derived from this configuration
    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            time_length: self.time_length,
            train_time_length: self.train_time_length,
            train_solver: SolverConfig::with_tolerance(self.tolerance),
            eval_solver: SolverConfig::with_tolerance(self.tolerance),
            divergence: self.divergence,
            regularization: self.regularization.clone(),
        }
    }

    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ConfigError("batch_size must be positive".to_string()));
        }
        if self.repeat_samples == 0 {
            return Err(Error::ConfigError("repeat_samples must be positive".to_string()));
        }
        if self.statistics_samples < 2 {
            return Err(Error::ConfigError(
                "statistics_samples must be at least 2".to_string(),
            ));
        }
        if !(self.tolerance > 0.0) {
            return Err(Error::ConfigError(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.lr > 0.0) {
            return Err(Error::ConfigError(format!("lr must be positive, got {}", self.lr)));
        }
        Ok(())
    }
}
