use std::collections::{BTreeMap, BTreeSet};
use tagmap_core::Pose;
use tagmap_graph::{EdgeKind, Graph, VertexId, VertexKind};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Convergence {
    Converged,
    /// The iteration budget ran out first. The estimates are the best found so far.
    DidNotConverge,
}

/// Chi2 of the edges around an odometry vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct AdjacentChi2 {
    pub chi2: f64,
    /// Number of distinct tags observed from the vertex.
    pub visible_tags: usize,
}

/// The outcome of one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Estimates of every vertex after the run, fixed ones included.
    pub estimates: BTreeMap<VertexId, Pose>,
    pub initial_chi2: f64,
    pub final_chi2: f64,
    /// Chi2 of every edge after the run, indexed like [`Graph::edges`].
    pub edge_chi2: Vec<f64>,
    pub iterations: usize,
    /// Number of times the residuals were evaluated, the initial evaluation included.
    pub evaluations: usize,
    pub convergence: Convergence,
}

impl OptimizationResult {
    pub fn converged(&self) -> bool {
        self.convergence == Convergence::Converged
    }

    /// Indices of the edges whose chi2 exceeds `threshold`.
    pub fn edges_above(&self, threshold: f64) -> Vec<usize> {
        self.edge_chi2
            .iter()
            .enumerate()
            .filter(|(_, &chi2)| chi2 > threshold)
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Final chi2 summed per edge kind. `graph` must be the graph that was optimized.
    pub fn chi2_by_kind(&self, graph: &Graph) -> BTreeMap<EdgeKind, f64> {
        let mut sums = BTreeMap::new();
        for (edge, chi2) in graph.edges().iter().zip(&self.edge_chi2) {
            *sums.entry(edge.kind).or_insert(0.0) += chi2;
        }
        sums
    }

    /// For every odometry vertex, the summed chi2 of its incident edges and how many tags it sees.
    pub fn odometry_adjacent_chi2(&self, graph: &Graph) -> BTreeMap<VertexId, AdjacentChi2> {
        graph
            .vertices_of_kind(VertexKind::Odometry)
            .map(|vertex| {
                let mut chi2 = 0.0;
                let mut tags = BTreeSet::new();
                for (ix, edge) in graph.incident_edges(vertex.id) {
                    chi2 += self.edge_chi2.get(ix).copied().unwrap_or(0.0);
                    if edge.kind.is_observation() {
                        tags.insert(edge.end);
                    }
                }
                (
                    vertex.id,
                    AdjacentChi2 {
                        chi2,
                        visible_tags: tags.len(),
                    },
                )
            })
            .collect()
    }
}
