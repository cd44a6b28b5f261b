//! # Regularization Integrands
//!
//! Auxiliary scalar quantities integrated alongside the flow, one state
//! channel per term. They are measured in solver time and are therefore
//! non-negative in both integration directions.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::network::DynamicsNetwork;

/// Step used for the finite-difference acceleration along the path
const PATH_DIFFERENCE_STEP: f64 = 1e-4;

/// Speed below which the direction of travel is undefined
const MIN_SPEED: f64 = 1e-12;

/// Supported regularization integrands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationKind {
    /// Rate at which the direction of travel turns (total angle)
    DirectionChange,
    /// Speed `‖v‖` (total path length)
    ArcLength,
    /// Squared speed `‖v‖²`
    KineticEnergy,
}

impl RegularizationKind {
    /// Metric name of the accumulated quantity
    pub fn name(&self) -> &'static str {
        match self {
            RegularizationKind::DirectionChange => "angle",
            RegularizationKind::ArcLength => "arc_len",
            RegularizationKind::KineticEnergy => "kinetic_energy",
        }
    }
}

impl std::fmt::Display for RegularizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Batch mean of one accumulated regularization channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegularizationState {
    pub kind: RegularizationKind,
    pub value: f64,
}

/// Evaluates the configured integrands for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegularizationTracker {
    kinds: Vec<RegularizationKind>,
}

impl RegularizationTracker {
    pub fn new(kinds: Vec<RegularizationKind>) -> Self {
        Self { kinds }
    }

    pub fn kinds(&self) -> &[RegularizationKind] {
        &self.kinds
    }

    /// Number of extra state channels
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Integrand values, shape `(batch, len())`
    ///
    /// `velocity` is the signed velocity in solver time; `sign` maps a solver
    /// time step onto the physical time of the network.
    pub fn integrands(
        &self,
        network: &DynamicsNetwork,
        t: f64,
        sign: f64,
        x: ArrayView2<f64>,
        condition: ArrayView2<f64>,
        velocity: &Array2<f64>,
    ) -> Array2<f64> {
        let batch = velocity.nrows();
        let mut out = Array2::zeros((batch, self.kinds.len()));
        if self.kinds.is_empty() {
            return out;
        }

        let speed_sq = velocity.mapv(|v| v * v).sum_axis(Axis(1));
        for (k, kind) in self.kinds.iter().enumerate() {
            let column = match kind {
                RegularizationKind::ArcLength => speed_sq.mapv(f64::sqrt),
                RegularizationKind::KineticEnergy => speed_sq.clone(),
                RegularizationKind::DirectionChange => {
                    turning_rate(network, t, sign, x, condition, velocity, &speed_sq)
                }
            };
            out.column_mut(k).assign(&column);
        }
        out
    }

    /// Batch means of the accumulated channels
    pub fn states(&self, accumulated: ArrayView2<f64>) -> Vec<RegularizationState> {
        let means = accumulated.mean_axis(Axis(0));
        self.kinds
            .iter()
            .enumerate()
            .map(|(k, &kind)| RegularizationState {
                kind,
                value: means.as_ref().map_or(0.0, |m| m[k]),
            })
            .collect()
    }
}

/// `‖a⊥‖ / ‖v‖` where `a` is the change of velocity along the path
fn turning_rate(
    network: &DynamicsNetwork,
    t: f64,
    sign: f64,
    x: ArrayView2<f64>,
    condition: ArrayView2<f64>,
    velocity: &Array2<f64>,
    speed_sq: &Array1<f64>,
) -> Array1<f64> {
    let h = PATH_DIFFERENCE_STEP;
    let ahead = &x + &(velocity * h);
    let velocity_ahead = network.velocity(t + sign * h, ahead.view(), condition) * sign;
    let accel = (velocity_ahead - velocity) / h;

    let mut rate = Array1::zeros(velocity.nrows());
    for (i, r) in rate.iter_mut().enumerate() {
        let speed = speed_sq[i].sqrt();
        if speed < MIN_SPEED {
            continue;
        }
        let v = velocity.row(i);
        let a = accel.row(i);
        let along = a.dot(&v) / speed;
        let perp_sq = (a.dot(&a) - along * along).max(0.0);
        *r = perp_sq.sqrt() / speed;
    }
    rate
}
