#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for a single optimization run.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OptimizerSettings {
    /// The most Levenberg-Marquardt iterations to run before giving up
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// Stop when an accepted step lowers chi2 by less than this fraction
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ftol"))]
    pub ftol: f64,
    /// Stop when the step is this small relative to the estimates
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_xtol"))]
    pub xtol: f64,
    /// Stop when no gradient component exceeds this
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_gtol"))]
    pub gtol: f64,
    /// Damping of the first iteration, relative to the diagonal of the normal equations
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_initial_damping"))]
    pub initial_damping: f64,
    /// Step used for the central differences of the edge jacobians
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_differentiation_step")
    )]
    pub differentiation_step: f64,
}

fn default_max_iterations() -> usize {
    100
}

fn default_ftol() -> f64 {
    1e-10
}

fn default_xtol() -> f64 {
    1e-10
}

fn default_gtol() -> f64 {
    0.0
}

fn default_initial_damping() -> f64 {
    1e-4
}

fn default_differentiation_step() -> f64 {
    1e-6
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            ftol: default_ftol(),
            xtol: default_xtol(),
            gtol: default_gtol(),
            initial_damping: default_initial_damping(),
            differentiation_step: default_differentiation_step(),
        }
    }
}
