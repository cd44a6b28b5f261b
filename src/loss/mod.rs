//! # Loss
//!
//! Standardization of model samples and the dual-direction KL estimator.
//!
//! With `x = shift + scale · z` the flow density in model space is
//!
//! ```text
//! log q_x(x) = log q_z(z) − Σ ln scale
//! ```
//!
//! The reverse branch pushes base samples through the flow and scores them
//! under the model. The forward branch pulls model samples back to the base
//! and scores them under the flow.

mod estimator;
mod standardization;

pub use estimator::{DualDirectionLossEstimator, FlowResult};
pub use standardization::{DataStatistics, Standardization, MIN_SCALE};
