//! # Training
//!
//! Everything around the optimization of a flow:
//! - zeroth-order gradient estimation with common random numbers
//! - Adam with coupled weight decay and a step learning-rate schedule
//! - named-parameter checkpoints on disk
//! - metric sinks for the per-step scalars

mod checkpoint;
mod gradient;
mod metrics;
mod optimizer;
mod trainer;

pub use checkpoint::FlowCheckpoint;
pub use gradient::{GradientEstimate, GradientEstimator};
pub use metrics::{MemorySink, MetricSink, TracingSink};
pub use optimizer::Adam;
pub use trainer::{
    LearningRateSchedule, LossChoice, StepReport, Trainer, TrainingConfig, TrainingSummary,
};
