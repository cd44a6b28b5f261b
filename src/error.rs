//! Error types for the faithful CNF library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Target model identifier not present in the registry
    #[error("Unknown target model: {0}")]
    UnknownModel(String),

    /// Connectivity mode identifier not recognised
    #[error("Unknown connectivity mode: {0}")]
    UnknownConnectivity(String),

    /// Loss choice identifier not recognised
    #[error("Unknown loss choice: {0}")]
    UnknownLossChoice(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Adjacency edge outside the variable ranges
    #[error("Adjacency edge {edge:?} out of range for {dim_latent} latent and {dim_condition} condition dimensions")]
    EdgeOutOfRange {
        edge: (usize, usize),
        dim_latent: usize,
        dim_condition: usize,
    },

    /// A latent dimension without its mandatory self-loop
    #[error("Latent dimension {0} has no self-loop edge")]
    MissingSelfLoop(usize),

    /// Target model returned a batch of the wrong size
    #[error("Batch shape mismatch in {context}: expected {expected} rows, got {actual}")]
    BatchShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Array dimension does not match what the component was built for
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Integration attempted before a condition batch was bound
    #[error("Condition buffer is not bound to the flow")]
    ConditionNotBound,

    /// Adaptive solver hit its step budget
    #[error("ODE solver exceeded {max_steps} steps at t = {time}")]
    MaxStepsExceeded { max_steps: usize, time: f64 },

    /// Adaptive solver step size collapsed
    #[error("ODE solver step size {step} fell below the minimum at t = {time}")]
    StepSizeUnderflow { step: f64, time: f64 },

    /// Flat parameter vector of the wrong length
    #[error("Parameter vector has length {actual}, expected {expected}")]
    ParameterLength { expected: usize, actual: usize },

    /// Named parameter absent from a checkpoint
    #[error("Checkpoint is missing parameter {0}")]
    MissingParameter(String),

    /// Array shape error
    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether the error was raised while validating setup (identifiers, configuration, graphs)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownModel(_)
                | Error::UnknownConnectivity(_)
                | Error::UnknownLossChoice(_)
                | Error::ConfigError(_)
                | Error::EdgeOutOfRange { .. }
                | Error::MissingSelfLoop(_)
        )
    }

    /// Whether the error came from the adaptive ODE solver
    pub fn is_solver_failure(&self) -> bool {
        matches!(
            self,
            Error::MaxStepsExceeded { .. } | Error::StepSizeUnderflow { .. }
        )
    }
}
