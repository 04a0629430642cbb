//! # `tagmap`
//!
//! Pose graph mapping for captures of phone odometry and fiducial tag sightings.
//!
//! The graph types and the optimizer live in their own crates and are re-exported here, so a
//! script or tool only needs this one dependency. If you are embedding a single stage (only
//! building graphs, for instance), depend on that crate directly.
//!
//! ## Modules
//! * [`compare`] - run captures under every prescaling strategy and weight vector, or sweep
//!   a grid of weights
//! * [`map`] - the optimized map and its processed map JSON
//! * [`metrics`] - accuracy of an optimized map against ground truth

pub use tagmap_core::*;
pub use tagmap_graph::*;
pub use tagmap_optimize::*;

pub mod compare;
pub mod map;
pub mod metrics;

pub use map::OptimizedMap;
