//! # tagmap-graph
//!
//! The pose graph of a mapping session and the builder that produces it.
//!
//! A [`Graph`] owns its vertices, its edges and the [`WeightVector`](tagmap_core::WeightVector)
//! their information was computed from. Edges are only created through the graph, so their
//! information always matches the current weights and [`Prescaling`] strategy, and the
//! optimizer never needs to know which strategy produced it.

mod builder;
mod capture;
mod graph;
mod information;

pub use builder::*;
pub use capture::*;
pub use graph::*;
pub use information::*;
