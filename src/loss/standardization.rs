//! Per-dimension affine standardization fitted from model samples.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{sample_batch, TargetModel};

/// Smallest admissible scale of a dimension
pub const MIN_SCALE: f64 = 1e-5;

/// `x_std = (x − shift) / scale`, column by column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    shift: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardization {
    pub fn new(shift: Array1<f64>, scale: Array1<f64>) -> Result<Self> {
        if shift.len() != scale.len() {
            return Err(Error::DimensionMismatch {
                context: "standardization scale",
                expected: shift.len(),
                actual: scale.len(),
            });
        }
        if let Some(bad) = scale.iter().find(|&&s| !(s > 0.0 && s.is_finite())) {
            return Err(Error::ConfigError(format!(
                "standardization scale must be positive and finite, got {}",
                bad
            )));
        }
        Ok(Self { shift, scale })
    }

    /// Zero shift, unit scale
    pub fn identity(dim: usize) -> Self {
        Self {
            shift: Array1::zeros(dim),
            scale: Array1::ones(dim),
        }
    }

    /// Column means and sample standard deviations of `samples`
    ///
    /// Scales are floored at [`MIN_SCALE`] so constant columns stay invertible.
    pub fn fit(samples: &Array2<f64>) -> Result<Self> {
        let n = samples.nrows();
        if n < 2 {
            return Err(Error::ConfigError(format!(
                "standardization needs at least 2 samples, got {}",
                n
            )));
        }
        let shift = samples.mean_axis(Axis(0)).ok_or_else(|| {
            Error::ConfigError("standardization needs a non-empty sample".to_string())
        })?;
        let scale = samples.std_axis(Axis(0), 1.0).mapv(|s| s.max(MIN_SCALE));
        Ok(Self { shift, scale })
    }

    pub fn dim(&self) -> usize {
        self.shift.len()
    }

    pub fn shift(&self) -> &Array1<f64> {
        &self.shift
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    fn check_columns(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.dim() {
            return Err(Error::DimensionMismatch {
                context: "standardized batch",
                expected: self.dim(),
                actual: x.ncols(),
            });
        }
        Ok(())
    }

    pub fn standardize(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(x)?;
        Ok((x - &self.shift) / &self.scale)
    }

    pub fn destandardize(&self, z: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(z)?;
        Ok(z * &self.scale + &self.shift)
    }

    /// `Σ ln scale`, the log-determinant of [`destandardize`](Self::destandardize)
    pub fn log_jacobian(&self) -> f64 {
        self.scale.mapv(f64::ln).sum()
    }
}

/// Standardization of latents and observations for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStatistics {
    pub latent: Standardization,
    pub condition: Standardization,
}

impl DataStatistics {
    /// Fit both standardizations from `samples` joint draws of `model`
    pub fn from_model<R: Rng>(model: &dyn TargetModel, samples: usize, rng: &mut R) -> Result<Self> {
        let (x, y) = sample_batch(model, samples, 1, rng)?;
        let latent = Standardization::fit(&x)?;
        let condition = Standardization::fit(&y)?;
        debug!(
            "Fitted statistics for {} from {} samples: latent shift {:?}, scale {:?}",
            model.name(),
            samples,
            latent.shift().as_slice(),
            latent.scale().as_slice()
        );
        Ok(Self { latent, condition })
    }

    /// Identity standardization of matching dimensions
    pub fn identity(dim_latent: usize, dim_condition: usize) -> Self {
        Self {
            latent: Standardization::identity(dim_latent),
            condition: Standardization::identity(dim_condition),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
