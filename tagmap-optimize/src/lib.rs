//! # tagmap-optimize
//!
//! Nonlinear least-squares optimization of [`tagmap_graph::Graph`]s.
//!
//! [`GraphOptimizer::optimize`] builds a [`GraphProblem`] over the free vertices of a graph,
//! runs Levenberg-Marquardt on its block-sparse [`NormalEquations`] and writes the optimized
//! estimates back.
//! Rotations are stepped through the exponential map so estimates stay on the manifold of
//! rigid transforms.

mod normal;
mod optimizer;
mod problem;
mod residual;
mod result;
mod settings;

pub use normal::*;
pub use optimizer::*;
pub use problem::*;
pub use residual::*;
pub use result::*;
pub use settings::*;
