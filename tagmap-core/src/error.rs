use thiserror::Error;

/// Failures that reject a capture, a weight vector or an optimization run.
///
/// A run that exhausts its iteration budget is not an error: it is reported
/// through the convergence status of its result so the estimate stays usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The capture record cannot be turned into a graph, e.g. an observation
    /// refers to an odometry timestamp that does not exist.
    #[error("malformed capture: {0}")]
    MalformedCapture(String),
    /// The normal equations of the graph are singular, usually because a
    /// component of free vertices has no fixed anchor.
    #[error("degenerate graph: {0}")]
    DegenerateGraph(String),
    /// The weight vector has the wrong length or a non-finite component.
    #[error("invalid weight vector: {0}")]
    InvalidWeightVector(String),
}
