use crate::{edge_information, CovariancePolicy, Prescaling};
use derive_more::{Display, From, Into};
use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tagmap_core::{CameraIntrinsics, Error, PixelCorners, Pose, WeightBlock, WeightVector};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Key of a vertex, unique within a graph.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[display(fmt = "{}", _0)]
pub struct VertexId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum VertexKind {
    Odometry,
    Tag,
    Dummy,
    Waypoint,
}

/// Kind-specific payload of a vertex.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexMeta {
    /// `pose_index` is the position along the odometry path.
    Odometry { timestamp: f64, pose_index: usize },
    Tag { tag_id: u32 },
    /// Gravity reference of the odometry vertex with the same timestamp.
    Dummy { timestamp: f64 },
    Waypoint { name: String },
}

/// Identifies the same physical vertex across graphs built from the same capture.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexKey {
    Odometry(FloatOrd<f64>),
    Tag(u32),
    Dummy(FloatOrd<f64>),
    Waypoint(String),
}

impl VertexMeta {
    pub fn kind(&self) -> VertexKind {
        match self {
            VertexMeta::Odometry { .. } => VertexKind::Odometry,
            VertexMeta::Tag { .. } => VertexKind::Tag,
            VertexMeta::Dummy { .. } => VertexKind::Dummy,
            VertexMeta::Waypoint { .. } => VertexKind::Waypoint,
        }
    }

    pub fn key(&self) -> VertexKey {
        match self {
            VertexMeta::Odometry { timestamp, .. } => VertexKey::Odometry(FloatOrd(*timestamp)),
            VertexMeta::Tag { tag_id } => VertexKey::Tag(*tag_id),
            VertexMeta::Dummy { timestamp } => VertexKey::Dummy(FloatOrd(*timestamp)),
            VertexMeta::Waypoint { name } => VertexKey::Waypoint(name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub id: VertexId,
    /// The current estimate; this is what the optimizer moves.
    pub estimate: Pose,
    /// Fixed vertices are never moved by the optimizer.
    pub fixed: bool,
    pub meta: VertexMeta,
}

impl Vertex {
    pub fn kind(&self) -> VertexKind {
        self.meta.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum EdgeKind {
    Odometry,
    TagSba,
    TagCovariance,
    Dummy,
    Waypoint,
}

impl EdgeKind {
    /// The weight block this kind draws its confidence from.
    pub fn weight_block(self) -> Option<WeightBlock> {
        match self {
            EdgeKind::Odometry => Some(WeightBlock::Odometry),
            EdgeKind::TagSba => Some(WeightBlock::TagSba),
            EdgeKind::TagCovariance => Some(WeightBlock::TagCovariance),
            EdgeKind::Dummy => Some(WeightBlock::Dummy),
            EdgeKind::Waypoint => None,
        }
    }

    /// Whether the edge is a tag sighting.
    pub fn is_observation(self) -> bool {
        matches!(self, EdgeKind::TagSba | EdgeKind::TagCovariance)
    }
}

/// What an edge asserts about its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// The end vertex seen from the start vertex.
    Pose(Pose),
    /// Where the corners of the end tag appear in the image taken at the start vertex.
    Pixels {
        corners: PixelCorners,
        intrinsics: CameraIntrinsics,
        tag_size: f64,
    },
}

impl Measurement {
    pub fn residual_dim(&self) -> usize {
        match self {
            Measurement::Pose(_) => 6,
            Measurement::Pixels { .. } => 8,
        }
    }
}

/// One residual between two vertices. Information is owned by the graph and derived
/// from its weight vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub start: VertexId,
    pub end: VertexId,
    pub kind: EdgeKind,
    pub measurement: Measurement,
    prescale: Option<DMatrix<f64>>,
    information: DMatrix<f64>,
}

impl Edge {
    pub fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    /// The per-observation information the weight block is combined with, if any.
    pub fn prescale(&self) -> Option<&DMatrix<f64>> {
        self.prescale.as_ref()
    }

    pub fn touches(&self, id: VertexId) -> bool {
        self.start == id || self.end == id
    }
}

/// A pose graph together with the weight vector and prescaling it was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    vertices: BTreeMap<VertexId, Vertex>,
    edges: Vec<Edge>,
    weights: WeightVector,
    prescaling: Prescaling,
    covariance_policy: CovariancePolicy,
    next_id: usize,
}

impl Graph {
    pub fn new(
        weights: WeightVector,
        prescaling: Prescaling,
        covariance_policy: CovariancePolicy,
    ) -> Self {
        Self {
            vertices: BTreeMap::new(),
            edges: vec![],
            weights,
            prescaling,
            covariance_policy,
            next_id: 0,
        }
    }

    pub fn add_vertex(&mut self, estimate: Pose, fixed: bool, meta: VertexMeta) -> VertexId {
        let id = VertexId(self.next_id);
        self.next_id += 1;
        self.vertices.insert(
            id,
            Vertex {
                id,
                estimate,
                fixed,
                meta,
            },
        );
        id
    }

    /// Adds an edge, computing its information from the current weights. Returns the edge index.
    pub fn add_edge(
        &mut self,
        start: VertexId,
        end: VertexId,
        kind: EdgeKind,
        measurement: Measurement,
        prescale: Option<DMatrix<f64>>,
    ) -> Result<usize, Error> {
        for id in [start, end] {
            if !self.vertices.contains_key(&id) {
                return Err(Error::MalformedCapture(format!(
                    "{:?} edge references missing vertex {}",
                    kind, id
                )));
            }
        }
        let information = edge_information(
            kind,
            prescale.as_ref(),
            &self.weights,
            self.covariance_policy,
        );
        self.edges.push(Edge {
            start,
            end,
            kind,
            measurement,
            prescale,
            information,
        });
        Ok(self.edges.len() - 1)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> + '_ {
        self.vertices.values()
    }

    pub fn vertices_of_kind(&self, kind: VertexKind) -> impl Iterator<Item = &Vertex> + '_ {
        self.vertices.values().filter(move |v| v.kind() == kind)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    pub fn prescaling(&self) -> Prescaling {
        self.prescaling
    }

    pub fn covariance_policy(&self) -> CovariancePolicy {
        self.covariance_policy
    }

    /// Replaces the weight vector and recomputes the information of every edge.
    pub fn set_weights(&mut self, weights: WeightVector) {
        self.weights = weights;
        for edge in &mut self.edges {
            edge.information = edge_information(
                edge.kind,
                edge.prescale.as_ref(),
                &self.weights,
                self.covariance_policy,
            );
        }
    }

    /// Current estimate of every vertex.
    pub fn estimates(&self) -> BTreeMap<VertexId, Pose> {
        self.vertices
            .iter()
            .map(|(&id, vertex)| (id, vertex.estimate))
            .collect()
    }

    /// Overwrites estimates of non-fixed vertices. Unknown and fixed ids are skipped.
    pub fn update_estimates<'a>(
        &mut self,
        estimates: impl IntoIterator<Item = (&'a VertexId, &'a Pose)>,
    ) {
        for (id, pose) in estimates {
            if let Some(vertex) = self.vertices.get_mut(id) {
                if !vertex.fixed {
                    vertex.estimate = *pose;
                }
            }
        }
    }

    pub fn tag_vertex(&self, tag_id: u32) -> Option<VertexId> {
        self.vertices
            .values()
            .find(|v| v.meta == VertexMeta::Tag { tag_id })
            .map(|v| v.id)
    }

    /// Odometry vertices ordered along the path.
    pub fn odometry_path(&self) -> Vec<VertexId> {
        self.vertices
            .values()
            .filter_map(|v| match v.meta {
                VertexMeta::Odometry { pose_index, .. } => Some((pose_index, v.id)),
                _ => None,
            })
            .sorted()
            .map(|(_, id)| id)
            .collect()
    }

    /// Edges incident to `id` with their indices.
    pub fn incident_edges(&self, id: VertexId) -> impl Iterator<Item = (usize, &Edge)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, edge)| edge.touches(id))
    }

    /// Drops tag observation edges whose chi2 exceeds `threshold` and the tags left unobserved.
    ///
    /// `edge_chi2` must be indexed like [`Graph::edges`]. Returns the number of removed edges.
    pub fn remove_observations_above(&mut self, edge_chi2: &[f64], threshold: f64) -> usize {
        let before = self.edges.len();
        let mut chi2 = edge_chi2.iter();
        self.edges.retain(|edge| {
            let above = chi2.next().map_or(false, |&c| c > threshold);
            !(edge.kind.is_observation() && above)
        });
        let removed = before - self.edges.len();
        let observed: BTreeSet<VertexId> =
            self.edges.iter().flat_map(|e| [e.start, e.end]).collect();
        let orphans = self
            .vertices
            .values()
            .filter(|v| v.kind() == VertexKind::Tag && !observed.contains(&v.id))
            .map(|v| v.id)
            .collect_vec();
        for id in &orphans {
            self.vertices.remove(id);
        }
        debug!(
            "removed {} observation edges above chi2 {} and {} unobserved tags",
            removed,
            threshold,
            orphans.len()
        );
        removed
    }

    /// The graph induced by the odometry vertices at `path` positions along the odometry path,
    /// together with their dummies and every tag or waypoint they observe. Vertex ids are kept.
    pub fn subgraph(&self, path: Range<usize>) -> Graph {
        let odometry: BTreeSet<VertexId> = self
            .odometry_path()
            .get(path)
            .unwrap_or(&[])
            .iter()
            .copied()
            .collect();
        let mut keep = odometry.clone();
        for edge in &self.edges {
            let other = if odometry.contains(&edge.start) {
                edge.end
            } else if odometry.contains(&edge.end) {
                edge.start
            } else {
                continue;
            };
            if self
                .vertices
                .get(&other)
                .map_or(false, |v| v.kind() != VertexKind::Odometry)
            {
                keep.insert(other);
            }
        }
        Graph {
            vertices: self
                .vertices
                .iter()
                .filter(|(id, _)| keep.contains(id))
                .map(|(&id, v)| (id, v.clone()))
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep.contains(&e.start) && keep.contains(&e.end))
                .cloned()
                .collect(),
            weights: self.weights,
            prescaling: self.prescaling,
            covariance_policy: self.covariance_policy,
            next_id: self.next_id,
        }
    }

    /// Copies the estimates of vertices of the given kinds from `other`, matching vertices by
    /// their identity (tag id, waypoint name, timestamp). Returns the ids that received an
    /// estimate.
    pub fn transfer_estimates(&mut self, other: &Graph, kinds: &[VertexKind]) -> Vec<VertexId> {
        let source: BTreeMap<VertexKey, Pose> = other
            .vertices
            .values()
            .filter(|v| kinds.contains(&v.kind()))
            .map(|v| (v.meta.key(), v.estimate))
            .collect();
        self.vertices
            .values_mut()
            .filter_map(|vertex| {
                let pose = source.get(&vertex.meta.key())?;
                vertex.estimate = *pose;
                Some(vertex.id)
            })
            .collect()
    }

    /// Removes the listed vertices and every edge touching them. Returns the number of
    /// removed edges.
    pub fn remove_vertices(&mut self, ids: &[VertexId]) -> usize {
        for id in ids {
            self.vertices.remove(id);
        }
        let before = self.edges.len();
        let vertices = &self.vertices;
        self.edges
            .retain(|edge| vertices.contains_key(&edge.start) && vertices.contains_key(&edge.end));
        before - self.edges.len()
    }

    /// Fixes or frees the listed vertices. Unknown ids are ignored.
    pub fn set_vertices_fixed(&mut self, ids: &[VertexId], fixed: bool) {
        for id in ids {
            if let Some(vertex) = self.vertices.get_mut(id) {
                vertex.fixed = fixed;
            }
        }
    }
}
