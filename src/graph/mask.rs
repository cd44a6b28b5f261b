//! Binary weight masks compiled from an adjacency set.

use ndarray::Array2;
use tracing::debug;

use super::AdjacencySet;
use crate::error::{Error, Result};

/// Dense `dim_out × dim_in` binary connectivity matrix
///
/// A zero entry removes the corresponding input from the corresponding output
/// for as long as the owning layer lives.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMask {
    mask: Array2<f64>,
}

impl WeightMask {
    /// Entry `(a, b)` is one iff `(a, b)` is an edge and `b < dim_in`
    pub fn from_adjacency(dim_in: usize, dim_out: usize, adjacency: &AdjacencySet) -> Result<Self> {
        if dim_out != adjacency.dim_latent() {
            return Err(Error::DimensionMismatch {
                context: "weight mask output",
                expected: adjacency.dim_latent(),
                actual: dim_out,
            });
        }

        let mut mask = Array2::zeros((dim_out, dim_in));
        for edge in adjacency.edges().filter(|e| e.target < dim_in) {
            mask[[edge.source, edge.target]] = 1.0;
        }

        let weight_mask = Self { mask };
        debug!(
            "Built {}x{} weight mask with {} active connections",
            dim_out,
            dim_in,
            weight_mask.active_count()
        );
        Ok(weight_mask)
    }

    pub fn dim_in(&self) -> usize {
        self.mask.ncols()
    }

    pub fn dim_out(&self) -> usize {
        self.mask.nrows()
    }

    pub fn is_connected(&self, output: usize, input: usize) -> bool {
        self.mask[[output, input]] != 0.0
    }

    pub fn active_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m != 0.0).count()
    }

    /// Elementwise product with a weight matrix of the same shape
    pub fn apply(&self, weight: &Array2<f64>) -> Array2<f64> {
        weight * &self.mask
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.mask
    }
}

impl std::fmt::Display for WeightMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in self.mask.outer_iter() {
            let line: Vec<&str> = row.iter().map(|&m| if m != 0.0 { "1" } else { "." }).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_from_adjacency() {
        let adjacency = AdjacencySet::with_self_loops(2, 1, [(0, 2), (1, 0)]).unwrap();
        let mask = WeightMask::from_adjacency(4, 2, &adjacency).unwrap();

        assert_eq!(mask.dim_in(), 4);
        assert_eq!(mask.dim_out(), 2);
        assert!(mask.is_connected(0, 0));
        assert!(mask.is_connected(0, 2));
        assert!(mask.is_connected(1, 0));
        assert!(!mask.is_connected(0, 1));
        // The time column is never part of the adjacency
        assert!(!mask.is_connected(0, 3));
        assert_eq!(mask.active_count(), 4);
    }

    #[test]
    fn test_narrow_input_drops_condition_edges() {
        let adjacency = AdjacencySet::with_self_loops(1, 1, [(0, 1)]).unwrap();
        let mask = WeightMask::from_adjacency(1, 1, &adjacency).unwrap();
        assert_eq!(mask.active_count(), 1);
    }

    #[test]
    fn test_output_dimension_checked() {
        let adjacency = AdjacencySet::fully_connected(3, 0);
        assert!(WeightMask::from_adjacency(3, 2, &adjacency).is_err());
    }

    #[test]
    fn test_display() {
        let adjacency = AdjacencySet::with_self_loops(1, 1, [(0, 1)]).unwrap();
        let mask = WeightMask::from_adjacency(3, 1, &adjacency).unwrap();
        assert_eq!(mask.to_string(), "1 1 .\n");
    }
}
