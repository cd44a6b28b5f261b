//! # Graph Structure
//!
//! Directed dependency structure of a graphical model, and the binary weight
//! masks compiled from it.
//!
//! An edge `(source, target)` states that the velocity of latent variable
//! `source` may depend on variable `target`. Targets below `dim_latent` are
//! latent variables, the rest index the conditioning observations.

mod adjacency;
mod mask;

pub use adjacency::{AdjacencyEdge, AdjacencySet};
pub use mask::WeightMask;
