//! Adjacency sets describing which variables each latent velocity may read.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single directed dependency: `source` reads `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    /// Latent variable whose velocity is affected
    pub source: usize,
    /// Variable (latent or condition) it may depend on
    pub target: usize,
}

impl AdjacencyEdge {
    pub const fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

impl From<(usize, usize)> for AdjacencyEdge {
    fn from((source, target): (usize, usize)) -> Self {
        Self::new(source, target)
    }
}

impl From<[usize; 2]> for AdjacencyEdge {
    fn from([source, target]: [usize; 2]) -> Self {
        Self::new(source, target)
    }
}

/// Validated, deduplicated set of adjacency edges
///
/// Every latent index `i` is guaranteed to carry the self-loop `(i, i)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencySet {
    dim_latent: usize,
    dim_condition: usize,
    edges: BTreeSet<AdjacencyEdge>,
}

impl AdjacencySet {
    /// Build a set from explicit edges, validating ranges and self-loops
    pub fn new<I, E>(dim_latent: usize, dim_condition: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<AdjacencyEdge>,
    {
        let set = Self {
            dim_latent,
            dim_condition,
            edges: edges.into_iter().map(Into::into).collect(),
        };
        set.validate()?;
        Ok(set)
    }

    /// Build a set from explicit edges and add every latent self-loop
    pub fn with_self_loops<I, E>(dim_latent: usize, dim_condition: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<AdjacencyEdge>,
    {
        let self_loops = (0..dim_latent).map(|i| AdjacencyEdge::new(i, i));
        let all = edges.into_iter().map(Into::into).chain(self_loops);
        Self::new(dim_latent, dim_condition, all)
    }

    /// Every latent variable reads every latent and condition variable
    pub fn fully_connected(dim_latent: usize, dim_condition: usize) -> Self {
        let total = dim_latent + dim_condition;
        let edges = (0..dim_latent)
            .flat_map(|source| (0..total).map(move |target| AdjacencyEdge::new(source, target)))
            .collect();
        Self {
            dim_latent,
            dim_condition,
            edges,
        }
    }

    /// Random structure with `edge_count` edges
    ///
    /// All self-loops are kept, the remaining edges are sampled without
    /// replacement from the non-self-loop pairs.
    pub fn random<R: Rng + ?Sized>(
        dim_latent: usize,
        dim_condition: usize,
        edge_count: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let total = dim_latent + dim_condition;
        let candidates: Vec<AdjacencyEdge> = (0..dim_latent)
            .flat_map(|source| (0..total).map(move |target| AdjacencyEdge::new(source, target)))
            .filter(|edge| !edge.is_self_loop())
            .collect();

        if edge_count < dim_latent || edge_count - dim_latent > candidates.len() {
            return Err(Error::ConfigError(format!(
                "cannot build a random adjacency with {} edges over {} latent and {} condition dimensions",
                edge_count, dim_latent, dim_condition
            )));
        }

        let chosen = rand::seq::index::sample(rng, candidates.len(), edge_count - dim_latent);
        let edges = chosen.into_iter().map(|idx| candidates[idx]);
        Self::with_self_loops(dim_latent, dim_condition, edges)
    }

    fn validate(&self) -> Result<()> {
        let total = self.dim_latent + self.dim_condition;
        if let Some(edge) = self
            .edges
            .iter()
            .find(|e| e.source >= self.dim_latent || e.target >= total)
        {
            return Err(Error::EdgeOutOfRange {
                edge: (edge.source, edge.target),
                dim_latent: self.dim_latent,
                dim_condition: self.dim_condition,
            });
        }
        if let Some(missing) = (0..self.dim_latent).find(|&i| !self.contains(i, i)) {
            return Err(Error::MissingSelfLoop(missing));
        }
        Ok(())
    }

    pub fn dim_latent(&self) -> usize {
        self.dim_latent
    }

    pub fn dim_condition(&self) -> usize {
        self.dim_condition
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, source: usize, target: usize) -> bool {
        self.edges.contains(&AdjacencyEdge::new(source, target))
    }

    /// Edges in `(source, target)` order
    pub fn edges(&self) -> impl Iterator<Item = AdjacencyEdge> + '_ {
        self.edges.iter().copied()
    }

    /// Edges whose target is a conditioning variable
    pub fn conditioning_edges(&self) -> impl Iterator<Item = AdjacencyEdge> + '_ {
        let dim_latent = self.dim_latent;
        self.edges().filter(move |e| e.target >= dim_latent)
    }

    /// Targets read by a given latent variable
    pub fn parents_of(&self, source: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .range(AdjacencyEdge::new(source, 0)..AdjacencyEdge::new(source + 1, 0))
            .map(|e| e.target)
    }
}

// ============================================================================
// Tests
// ============================================================================
