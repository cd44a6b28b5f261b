//! # Dormand-Prince 5(4) Solver
//!
//! Adaptive Runge-Kutta integrator with 5th order accuracy and an embedded
//! 4th order error estimate. The state is a batch matrix; one step size is
//! shared by the whole batch and the error norm is the RMS over every entry.
//!
//! The last stage of an accepted step is reused as the first stage of the
//! next one (FSAL), so each step costs six evaluations.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Trait for a right-hand side `dy/dt = f(y, t)` over batched state
pub trait OdeFunc {
    /// Evaluate the derivative at state `y` and time `t`
    fn evaluate(&mut self, y: &Array2<f64>, t: f64) -> Array2<f64>;
}

/// Absolute and relative error tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Tolerance {
    /// Same value for both tolerances
    pub const fn uniform(tol: f64) -> Self {
        Self { atol: tol, rtol: tol }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::uniform(crate::config::DEFAULT_TOLERANCE)
    }
}

/// Solver configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub tolerance: Tolerance,
    /// Maximum number of attempted steps before the call fails
    pub max_steps: usize,
    /// Smallest admissible step size
    pub min_step: f64,
}

impl SolverConfig {
    pub fn with_tolerance(tol: f64) -> Self {
        Self {
            tolerance: Tolerance::uniform(tol),
            ..Self::default()
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            max_steps: 10_000,
            min_step: 1e-12,
        }
    }
}

/// Step statistics of one integration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub evaluations: usize,
}

// Dormand-Prince coefficients
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between 5th and 4th order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

/// Dormand-Prince 5(4) adaptive solver
#[derive(Debug, Clone, Default)]
pub struct Dopri5Solver {
    config: SolverConfig,
}

struct Step {
    y_new: Array2<f64>,
    y_err: Array2<f64>,
    k7: Array2<f64>,
}

impl Dopri5Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Integrate from `t_span.0` to `t_span.1`, which may run backwards
    pub fn integrate(
        &self,
        func: &mut dyn OdeFunc,
        y0: Array2<f64>,
        t_span: (f64, f64),
    ) -> Result<(Array2<f64>, SolverStats)> {
        let (t0, t1) = t_span;
        let mut stats = SolverStats::default();
        if t1 == t0 {
            return Ok((y0, stats));
        }

        let direction = (t1 - t0).signum();
        let mut t = t0;
        let mut y = y0;
        let mut k1 = func.evaluate(&y, t);
        stats.evaluations += 1;

        let mut h = self.initial_step(func, &y, &k1, t, direction);
        stats.evaluations += 1;

        loop {
            let remaining = (t1 - t).abs();
            if remaining == 0.0 {
                break;
            }
            if stats.accepted_steps + stats.rejected_steps >= self.config.max_steps {
                return Err(Error::MaxStepsExceeded {
                    max_steps: self.config.max_steps,
                    time: t,
                });
            }

            let last_step = h >= remaining;
            let h_abs = h.min(remaining);
            if h_abs < self.config.min_step && !last_step {
                return Err(Error::StepSizeUnderflow { step: h_abs, time: t });
            }

            let step = self.step_with_error(func, &y, &k1, t, direction * h_abs);
            stats.evaluations += 6;

            let err = self.error_norm(&step.y_err, &y, &step.y_new);
            if err <= 1.0 {
                t = if last_step { t1 } else { t + direction * h_abs };
                y = step.y_new;
                k1 = step.k7;
                stats.accepted_steps += 1;
            } else {
                stats.rejected_steps += 1;
            }
            h = h_abs * step_factor(err);
        }

        debug!(
            "Dopri5 finished: {} accepted, {} rejected, {} evaluations",
            stats.accepted_steps, stats.rejected_steps, stats.evaluations
        );
        Ok((y, stats))
    }

    /// One step of size `h` (signed) starting from `y` with first stage `k1`
    fn step_with_error(
        &self,
        func: &mut dyn OdeFunc,
        y: &Array2<f64>,
        k1: &Array2<f64>,
        t: f64,
        h: f64,
    ) -> Step {
        let y2 = combine(y, h, &[(A21, k1)]);
        let k2 = func.evaluate(&y2, t + C2 * h);

        let y3 = combine(y, h, &[(A31, k1), (A32, &k2)]);
        let k3 = func.evaluate(&y3, t + C3 * h);

        let y4 = combine(y, h, &[(A41, k1), (A42, &k2), (A43, &k3)]);
        let k4 = func.evaluate(&y4, t + C4 * h);

        let y5 = combine(y, h, &[(A51, k1), (A52, &k2), (A53, &k3), (A54, &k4)]);
        let k5 = func.evaluate(&y5, t + C5 * h);

        let y6 = combine(y, h, &[(A61, k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)]);
        let k6 = func.evaluate(&y6, t + h);

        let y_new = combine(y, h, &[(B1, k1), (B3, &k3), (B4, &k4), (B5, &k5), (B6, &k6)]);
        let k7 = func.evaluate(&y_new, t + h);

        let zero = Array2::zeros(y.raw_dim());
        let y_err = combine(
            &zero,
            h,
            &[(E1, k1), (E3, &k3), (E4, &k4), (E5, &k5), (E6, &k6), (E7, &k7)],
        );

        Step { y_new, y_err, k7 }
    }

    /// Mixed RMS norm of the local error relative to the tolerance
    fn error_norm(&self, y_err: &Array2<f64>, y: &Array2<f64>, y_new: &Array2<f64>) -> f64 {
        let Tolerance { atol, rtol } = self.config.tolerance;
        let n = y_err.len().max(1);
        let sum: f64 = y_err
            .iter()
            .zip(y.iter())
            .zip(y_new.iter())
            .map(|((&e, &a), &b)| {
                let scale = atol + rtol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / n as f64).sqrt()
    }

    /// Hairer's starting step heuristic; costs one evaluation
    fn initial_step(
        &self,
        func: &mut dyn OdeFunc,
        y0: &Array2<f64>,
        f0: &Array2<f64>,
        t0: f64,
        direction: f64,
    ) -> f64 {
        let Tolerance { atol, rtol } = self.config.tolerance;
        let scale = y0.mapv(|v| atol + rtol * v.abs());

        let d0 = rms(&(y0 / &scale));
        let d1 = rms(&(f0 / &scale));
        let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };

        let y1 = combine(y0, direction * h0, &[(1.0, f0)]);
        let f1 = func.evaluate(&y1, t0 + direction * h0);
        let d2 = rms(&((&f1 - f0) / &scale)) / h0;

        let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / 5.0)
        };

        (100.0 * h0).min(h1)
    }
}

/// `y + h * Σ c_i k_i`
fn combine(y: &Array2<f64>, h: f64, terms: &[(f64, &Array2<f64>)]) -> Array2<f64> {
    let mut out = y.clone();
    for &(c, k) in terms {
        out.scaled_add(h * c, k);
    }
    out
}

fn rms(values: &Array2<f64>) -> f64 {
    let n = values.len().max(1);
    (values.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt()
}

/// Step size multiplier for a given error norm
fn step_factor(err: f64) -> f64 {
    if err == 0.0 {
        return MAX_FACTOR;
    }
    let factor = SAFETY * (1.0 / err).powf(0.2);
    factor.max(MIN_FACTOR).min(MAX_FACTOR)
}

// ============================================================================
// Tests
// ============================================================================
