use crate::residual::{edge_error, sqrt_information};
use crate::NormalEquations;
use nalgebra::{DMatrix, DVector, Vector6};
use std::collections::BTreeMap;
use tagmap_core::{Pose, Se3TangentSpace};
use tagmap_graph::{Edge, Graph, VertexId};

/// An edge together with the matrix that whitens its error.
struct WhitenedEdge<'a> {
    edge: &'a Edge,
    sqrt_information: DMatrix<f64>,
}

impl WhitenedEdge<'_> {
    fn residual(&self, start: &Pose, end: &Pose) -> DVector<f64> {
        &self.sqrt_information * edge_error(self.edge, start, end)
    }
}

/// Estimates reached by a step, with the whitened residuals of every edge there.
pub struct Candidate {
    estimates: BTreeMap<VertexId, Pose>,
    residuals: Vec<DVector<f64>>,
    pub chi2: f64,
}

/// The least-squares problem over the free vertices of a graph.
///
/// Each free vertex owns a block of six parameters: a tangent step applied to its current
/// estimate with [`Pose::retract`]. Fixed vertices own none and keep their estimates.
pub struct GraphProblem<'a> {
    edges: Vec<WhitenedEdge<'a>>,
    /// Parameter block of every free vertex.
    free: BTreeMap<VertexId, usize>,
    estimates: BTreeMap<VertexId, Pose>,
    residuals: Vec<DVector<f64>>,
    differentiation_step: f64,
}

impl<'a> GraphProblem<'a> {
    pub fn new(graph: &'a Graph, differentiation_step: f64) -> Self {
        let edges = graph
            .edges()
            .iter()
            .map(|edge| WhitenedEdge {
                edge,
                sqrt_information: sqrt_information(edge.information()),
            })
            .collect();
        let free = graph
            .vertices()
            .filter(|v| !v.fixed)
            .enumerate()
            .map(|(block, v)| (v.id, block))
            .collect();
        let mut problem = Self {
            edges,
            free,
            estimates: graph.estimates(),
            residuals: vec![],
            differentiation_step,
        };
        problem.residuals = problem.residuals_at(&problem.estimates);
        problem
    }

    pub fn num_free_vertices(&self) -> usize {
        self.free.len()
    }

    pub fn num_residuals(&self) -> usize {
        self.residuals.iter().map(|r| r.len()).sum()
    }

    /// Sum of the squared whitened residuals.
    pub fn chi2(&self) -> f64 {
        self.edge_chi2().iter().sum()
    }

    /// Chi2 of every edge, in graph order.
    pub fn edge_chi2(&self) -> Vec<f64> {
        self.residuals.iter().map(|r| r.norm_squared()).collect()
    }

    /// Current estimates of the free vertices.
    pub fn free_estimates(&self) -> BTreeMap<VertexId, Pose> {
        self.free
            .keys()
            .map(|id| (*id, self.estimate(*id)))
            .collect()
    }

    /// Norm of the free estimates taken as stacked tangent vectors.
    pub fn parameter_norm(&self) -> f64 {
        self.free
            .keys()
            .map(|&id| self.estimate(id).log().to_vec().norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Linearizes every edge at the current estimates.
    ///
    /// Edge jacobians come from central differences over the six step components of each
    /// free endpoint, so an edge only ever touches the blocks of its own endpoints.
    pub fn linearize(&self) -> NormalEquations {
        let mut normal = NormalEquations::new(self.free.len());
        for (whitened, residual) in self.edges.iter().zip(&self.residuals) {
            let start = self.estimate(whitened.edge.start);
            let end = self.estimate(whitened.edge.end);
            let jacobians: Vec<(usize, DMatrix<f64>)> =
                [(whitened.edge.start, true), (whitened.edge.end, false)]
                    .into_iter()
                    .filter_map(|(id, at_start)| {
                        let block = *self.free.get(&id)?;
                        Some((block, self.jacobian(whitened, &start, &end, at_start)))
                    })
                    .collect();
            for (a, ja) in &jacobians {
                normal.add_gradient(*a, &ja.tr_mul(residual));
                for (b, jb) in &jacobians {
                    if a >= b {
                        normal.add_hessian(*a, *b, &ja.tr_mul(jb));
                    }
                }
            }
        }
        normal
    }

    /// Applies `step`, six components per free vertex block, without moving the problem.
    pub fn try_step(&self, step: &DVector<f64>) -> Candidate {
        let mut estimates = self.estimates.clone();
        for (id, &block) in &self.free {
            let delta = Se3TangentSpace::from_vec(step.fixed_rows::<6>(6 * block).into_owned());
            if let Some(estimate) = estimates.get_mut(id) {
                *estimate = estimate.retract(&delta);
            }
        }
        let residuals = self.residuals_at(&estimates);
        let chi2 = residuals.iter().map(|r| r.norm_squared()).sum();
        Candidate {
            estimates,
            residuals,
            chi2,
        }
    }

    pub fn accept(&mut self, candidate: Candidate) {
        self.estimates = candidate.estimates;
        self.residuals = candidate.residuals;
    }

    fn estimate(&self, id: VertexId) -> Pose {
        self.estimates.get(&id).copied().unwrap_or_default()
    }

    fn residuals_at(&self, estimates: &BTreeMap<VertexId, Pose>) -> Vec<DVector<f64>> {
        let estimate = |id| estimates.get(&id).copied().unwrap_or_default();
        self.edges
            .iter()
            .map(|whitened| {
                whitened.residual(&estimate(whitened.edge.start), &estimate(whitened.edge.end))
            })
            .collect()
    }

    fn jacobian(
        &self,
        whitened: &WhitenedEdge<'_>,
        start: &Pose,
        end: &Pose,
        at_start: bool,
    ) -> DMatrix<f64> {
        let h = self.differentiation_step;
        let evaluate = |k: usize, h: f64| {
            let mut step = Vector6::zeros();
            step[k] = h;
            let step = Se3TangentSpace::from_vec(step);
            if at_start {
                whitened.residual(&start.retract(&step), end)
            } else {
                whitened.residual(start, &end.retract(&step))
            }
        };
        let columns: Vec<DVector<f64>> = (0..6)
            .map(|k| (evaluate(k, h) - evaluate(k, -h)) / (2.0 * h))
            .collect();
        DMatrix::from_columns(&columns)
    }
}
