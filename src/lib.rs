//! # Structure-Faithful Continuous Normalizing Flows
//!
//! This crate trains conditional continuous normalizing flows as amortized
//! posteriors for graphical models. The velocity network can be masked with
//! the dependency structure of the model, so each latent variable only reads
//! the variables it depends on.
//!
//! ## Features
//!
//! - **Structure masks**: adjacency sets compiled into layer weight masks
//! - **CNF engine**: augmented ODE with Hutchinson divergence estimate and
//!   path regularizers, integrated with adaptive Dormand-Prince
//! - **Dual KL loss**: forward and reverse KL on the same batch
//! - **Target models**: Gaussian Bayesian network, state space models,
//!   arithmetic circuits and low-dimensional toy problems
//! - **Training**: zeroth-order gradients, Adam, checkpoints and metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faithful_cnf::prelude::*;
//!
//! fn main() -> faithful_cnf::Result<()> {
//!     let config = ExperimentConfig {
//!         model: "crazy1d".to_string(),
//!         connectivity: "faithful".to_string(),
//!         ..ExperimentConfig::default()
//!     };
//!
//!     let mut experiment = Experiment::setup(&config)?;
//!     let summary = experiment.run(&mut TracingSink)?;
//!     println!("forward KL {:.4}", summary.forward_kl);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: Adjacency sets and weight masks
//! - [`cnf`]: Dynamics network, augmented ODE, solver and flow
//! - [`models`]: Target graphical models
//! - [`loss`]: Standardization and the dual-direction KL estimator
//! - [`training`]: Optimizer, gradient estimators, checkpoints, metrics
//! - [`config`]: Experiment configuration
//! - [`experiment`]: Assembly of a run from its configuration

pub mod cnf;
pub mod config;
pub mod distributions;
pub mod error;
pub mod experiment;
pub mod graph;
pub mod loss;
pub mod models;
pub mod training;

// Re-exports for convenience
pub use cnf::{ContinuousFlow, Direction, DynamicsNetwork, FlowConfig};
pub use config::{Connectivity, ExperimentConfig};
pub use error::{Error, Result};
pub use experiment::Experiment;
pub use graph::{AdjacencySet, WeightMask};
pub use loss::{DualDirectionLossEstimator, FlowResult};
pub use models::{ModelKind, TargetModel};
pub use training::{FlowCheckpoint, Trainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cnf::{
        ContinuousFlow, DivergenceEstimator, Direction, Dopri5Solver, DynamicsLayer, DynamicsNetwork,
        FlowConfig, FlowMode, FlowOutput, FlowState, MaskPolicy, OdeDynamicsFunction,
        RegularizationKind, RegularizationState, SolverConfig, Tolerance,
    };
    pub use crate::config::{Connectivity, ExperimentConfig};
    pub use crate::error::{Error, Result};
    pub use crate::experiment::Experiment;
    pub use crate::graph::{AdjacencyEdge, AdjacencySet, WeightMask};
    pub use crate::loss::{DataStatistics, DualDirectionLossEstimator, FlowResult, Standardization};
    pub use crate::models::{sample_batch, AugmentedModel, ModelKind, TargetModel};
    pub use crate::training::{
        FlowCheckpoint, GradientEstimator, LossChoice, MemorySink, MetricSink, Trainer,
        TrainingConfig, TracingSink,
    };
}
