//! # Continuous Normalizing Flows
//!
//! The flow engine: a time-conditioned, optionally structure-masked velocity
//! network, the augmented ODE carrying log-density and regularization
//! channels, and an adaptive Dormand-Prince integrator.
//!
//! ## Mathematical Background
//!
//! For `dx/dt = f(x, c, t)` the log-density evolves as
//!
//! ```text
//! d log p(x(t)) / dt = −Tr(∂f/∂x)
//! ```
//!
//! The trace is estimated with a single probe `ε` per integration:
//! `Tr(J) ≈ εᵀ J ε`, computed from one vector-Jacobian product.

mod dynamics;
mod flow;
mod layer;
mod network;
mod ode_solver;
mod regularization;

pub use dynamics::{DivergenceEstimator, OdeDynamicsFunction};
pub use flow::{
    ConditionBuffer, ContinuousFlow, Direction, FlowConfig, FlowMode, FlowOutput, FlowState,
    TrajectoryPoint,
};
pub use layer::{sigmoid, DynamicsLayer};
pub use network::{DynamicsNetwork, MaskPolicy};
pub use ode_solver::{Dopri5Solver, OdeFunc, SolverConfig, SolverStats, Tolerance};
pub use regularization::{RegularizationKind, RegularizationState, RegularizationTracker};
