use crate::{Convergence, GraphProblem, OptimizationResult, OptimizerSettings};
use itertools::Itertools;
use log::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tagmap_core::Error;
use tagmap_graph::{EdgeKind, Graph, VertexId, VertexKind};

/// Above this the damped system is no longer expected to produce a useful step.
const MAX_DAMPING: f64 = 1e32;
const MIN_DAMPING: f64 = 1e-12;

/// Chi2 of a graph at its current estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub chi2: f64,
    pub edge_chi2: Vec<f64>,
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ResidualsZero,
    SmallGradient,
    SmallStep,
    SmallReduction,
    /// Every step was rejected until the damping reached its ceiling.
    NoImprovementPossible,
    MaxIterations,
    /// The normal equations could not be factored at any damping.
    Singular,
}

impl Termination {
    /// Maps the reason the solver stopped onto the convergence status of the run.
    pub fn convergence(self) -> Result<Convergence, Error> {
        match self {
            Termination::MaxIterations => Ok(Convergence::DidNotConverge),
            Termination::Singular => Err(Error::DegenerateGraph(
                "normal equations are singular".to_string(),
            )),
            _ => Ok(Convergence::Converged),
        }
    }
}

struct Report {
    termination: Termination,
    iterations: usize,
    evaluations: usize,
}

/// Runs Levenberg-Marquardt over the free vertices of a graph.
///
/// Every iteration assembles block-sparse normal equations edge by edge and factors the
/// damped system with a sparse Cholesky decomposition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GraphOptimizer {
    pub settings: OptimizerSettings,
}

impl GraphOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Chi2 of `graph` without moving anything.
    pub fn evaluate(&self, graph: &Graph) -> Evaluation {
        let problem = GraphProblem::new(graph, self.settings.differentiation_step);
        Evaluation {
            chi2: problem.chi2(),
            edge_chi2: problem.edge_chi2(),
        }
    }

    /// Optimizes `graph` in place, starting from its current estimates.
    ///
    /// Fails with [`Error::DegenerateGraph`] before any iteration when a free vertex has no
    /// path to a fixed vertex, and after the run when the normal equations could not be
    /// factored. Running out of iterations is not an error: the result is marked
    /// [`Convergence::DidNotConverge`] and the graph holds the best estimates found.
    pub fn optimize(&self, graph: &mut Graph) -> Result<OptimizationResult, Error> {
        check_anchored(graph)?;

        let mut problem = GraphProblem::new(graph, self.settings.differentiation_step);
        let initial_chi2 = problem.chi2();
        if !initial_chi2.is_finite() {
            return Err(Error::DegenerateGraph(format!(
                "initial chi2 is {}",
                initial_chi2
            )));
        }
        if problem.num_free_vertices() == 0 {
            debug!("no free vertices, nothing to optimize");
            return Ok(OptimizationResult {
                estimates: graph.estimates(),
                initial_chi2,
                final_chi2: initial_chi2,
                edge_chi2: problem.edge_chi2(),
                iterations: 0,
                evaluations: 0,
                convergence: Convergence::Converged,
            });
        }

        let report = self.minimize(&mut problem);
        let convergence = report.termination.convergence()?;

        let final_chi2 = problem.chi2();
        let edge_chi2 = problem.edge_chi2();
        let estimates = problem.free_estimates();
        if estimates.values().any(|pose| !pose.is_finite()) || !final_chi2.is_finite() {
            return Err(Error::DegenerateGraph(
                "optimization produced non-finite estimates".to_string(),
            ));
        }
        info!(
            "optimized {} free vertices: chi2 {:.6} -> {:.6} in {} iterations ({:?})",
            problem.num_free_vertices(),
            initial_chi2,
            final_chi2,
            report.iterations,
            report.termination
        );
        if convergence == Convergence::DidNotConverge {
            warn!(
                "optimization did not converge after {} iterations",
                report.iterations
            );
        }
        graph.update_estimates(&estimates);

        Ok(OptimizationResult {
            estimates: graph.estimates(),
            initial_chi2,
            final_chi2,
            edge_chi2,
            iterations: report.iterations,
            evaluations: report.evaluations,
            convergence,
        })
    }

    /// Only steps that lower chi2 are accepted, so the problem never ends worse than it began.
    fn minimize(&self, problem: &mut GraphProblem<'_>) -> Report {
        let settings = &self.settings;
        let mut chi2 = problem.chi2();
        let mut damping = settings.initial_damping;
        let mut growth = 2.0;
        let mut normal = problem.linearize();
        let mut report = Report {
            termination: Termination::MaxIterations,
            iterations: 0,
            evaluations: 1,
        };
        while report.iterations < settings.max_iterations {
            if chi2 <= f64::MIN_POSITIVE {
                report.termination = Termination::ResidualsZero;
                return report;
            }
            if normal.gradient().amax() <= settings.gtol {
                report.termination = Termination::SmallGradient;
                return report;
            }
            report.iterations += 1;

            let scale = normal.damping_scale();
            let step = match normal.solve(&(&scale * damping)) {
                Some(step) => step,
                None => {
                    damping *= growth;
                    growth *= 2.0;
                    if damping > MAX_DAMPING {
                        report.termination = Termination::Singular;
                        return report;
                    }
                    continue;
                }
            };
            if step.norm() <= settings.xtol * (problem.parameter_norm() + settings.xtol) {
                report.termination = Termination::SmallStep;
                return report;
            }

            let candidate = problem.try_step(&step);
            report.evaluations += 1;
            // Reduction predicted by the linear model, `-gᵀδ + μ·δᵀDδ`.
            let predicted =
                damping * step.dot(&scale.component_mul(&step)) - normal.gradient().dot(&step);
            let actual = chi2 - candidate.chi2;
            if candidate.chi2.is_finite() && actual > 0.0 && predicted > 0.0 {
                let quality = actual / predicted;
                let relative = actual / chi2;
                chi2 = candidate.chi2;
                problem.accept(candidate);
                damping = (damping * (1.0 / 3.0f64).max(1.0 - (2.0 * quality - 1.0).powi(3)))
                    .max(MIN_DAMPING);
                growth = 2.0;
                trace!(
                    "iteration {}: chi2 {:.6}, damping {:.3e}",
                    report.iterations,
                    chi2,
                    damping
                );
                if relative <= settings.ftol {
                    report.termination = Termination::SmallReduction;
                    return report;
                }
                normal = problem.linearize();
            } else {
                damping *= growth;
                growth *= 2.0;
                if damping > MAX_DAMPING {
                    report.termination = Termination::NoImprovementPossible;
                    return report;
                }
            }
        }
        report
    }
}

/// Every free vertex must reach a fixed vertex through edges, otherwise its component can
/// slide freely and the normal equations are singular.
///
/// Dummy vertices only pin rotation, so they and their edges take no part in the search.
fn check_anchored(graph: &Graph) -> Result<(), Error> {
    let mut adjacency: BTreeMap<VertexId, Vec<VertexId>> = BTreeMap::new();
    for edge in graph.edges().iter().filter(|e| e.kind != EdgeKind::Dummy) {
        adjacency.entry(edge.start).or_default().push(edge.end);
        adjacency.entry(edge.end).or_default().push(edge.start);
    }
    let mut reached: BTreeSet<VertexId> = graph
        .vertices()
        .filter(|v| v.fixed && v.kind() != VertexKind::Dummy)
        .map(|v| v.id)
        .collect();
    let mut queue: VecDeque<VertexId> = reached.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        for &next in adjacency.get(&id).into_iter().flatten() {
            if reached.insert(next) {
                queue.push_back(next);
            }
        }
    }
    let stranded = graph
        .vertices()
        .filter(|v| !v.fixed && !reached.contains(&v.id))
        .map(|v| v.id)
        .collect_vec();
    if stranded.is_empty() {
        Ok(())
    } else {
        Err(Error::DegenerateGraph(format!(
            "{} free vertices have no path to a fixed vertex, e.g. vertex {}",
            stranded.len(),
            stranded[0]
        )))
    }
}
