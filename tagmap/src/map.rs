//! The optimized map of a capture and its processed map JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use tagmap_core::Pose;
use tagmap_graph::{Graph, VertexId, VertexMeta};
use tagmap_optimize::{AdjacentChi2, OptimizationResult};

/// An optimized odometry vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLocation {
    pub id: VertexId,
    pub timestamp: f64,
    pub pose_index: usize,
    pub pose: Pose,
    pub adjacent: AdjacentChi2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapTag {
    pub id: VertexId,
    pub tag_id: u32,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapWaypoint {
    pub id: VertexId,
    pub name: String,
    pub pose: Pose,
}

/// Everything a mapping session produces, sorted by vertex id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizedMap {
    pub locations: Vec<MapLocation>,
    pub tags: Vec<MapTag>,
    pub waypoints: Vec<MapWaypoint>,
}

impl OptimizedMap {
    /// Reads the map out of `graph` using the estimates of `result`.
    ///
    /// `result` must come from optimizing `graph`, otherwise the adjacent chi2 values are
    /// meaningless. Vertices missing from the result keep their graph estimate.
    pub fn extract(graph: &Graph, result: &OptimizationResult) -> Self {
        let adjacent = result.odometry_adjacent_chi2(graph);
        let mut map = Self::default();
        for vertex in graph.vertices() {
            let pose = result
                .estimates
                .get(&vertex.id)
                .copied()
                .unwrap_or(vertex.estimate);
            match &vertex.meta {
                &VertexMeta::Odometry {
                    timestamp,
                    pose_index,
                } => map.locations.push(MapLocation {
                    id: vertex.id,
                    timestamp,
                    pose_index,
                    pose,
                    adjacent: adjacent.get(&vertex.id).copied().unwrap_or(AdjacentChi2 {
                        chi2: 0.0,
                        visible_tags: 0,
                    }),
                }),
                &VertexMeta::Tag { tag_id } => map.tags.push(MapTag {
                    id: vertex.id,
                    tag_id,
                    pose,
                }),
                VertexMeta::Waypoint { name } => map.waypoints.push(MapWaypoint {
                    id: vertex.id,
                    name: name.clone(),
                    pose,
                }),
                VertexMeta::Dummy { .. } => {}
            }
        }
        map
    }

    pub fn tag(&self, tag_id: u32) -> Option<&MapTag> {
        self.tags.iter().find(|tag| tag.tag_id == tag_id)
    }

    /// Tag poses keyed by tag id, the form
    /// [`ground_truth_metric`](crate::metrics::ground_truth_metric) takes.
    pub fn tag_poses(&self) -> BTreeMap<u32, Pose> {
        self.tags.iter().map(|tag| (tag.tag_id, tag.pose)).collect()
    }

    pub fn processed(&self) -> ProcessedMap {
        ProcessedMap {
            tag_vertices: self
                .tags
                .iter()
                .map(|tag| ProcessedVertex::new(&tag.pose, VertexLabel::Number(tag.tag_id.into())))
                .collect(),
            odometry_vertices: self
                .locations
                .iter()
                .map(|location| {
                    let [x, y, z, qx, qy, qz, qw] = location.pose.to_vector();
                    ProcessedOdometry {
                        translation: Translation { x, y, z },
                        rotation: Rotation {
                            x: qx,
                            y: qy,
                            z: qz,
                            w: qw,
                        },
                        id: location.id.0,
                        pose_id: location.pose_index,
                        adj_chi2: location.adjacent.chi2,
                        viz_tags: location.adjacent.visible_tags,
                    }
                })
                .collect(),
            waypoints_vertices: self
                .waypoints
                .iter()
                .map(|waypoint| {
                    ProcessedVertex::new(&waypoint.pose, VertexLabel::Name(waypoint.name.clone()))
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.processed())
    }

    pub fn write_json(&self, writer: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, &self.processed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Tags are labelled by their id, waypoints by their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VertexLabel {
    Number(u64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedVertex {
    pub translation: Translation,
    pub rotation: Rotation,
    pub id: VertexLabel,
}

impl ProcessedVertex {
    fn new(pose: &Pose, id: VertexLabel) -> Self {
        let [x, y, z, qx, qy, qz, qw] = pose.to_vector();
        Self {
            translation: Translation { x, y, z },
            rotation: Rotation {
                x: qx,
                y: qy,
                z: qz,
                w: qw,
            },
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedOdometry {
    pub translation: Translation,
    pub rotation: Rotation,
    pub id: usize,
    #[serde(rename = "poseId")]
    pub pose_id: usize,
    #[serde(rename = "adjChi2")]
    pub adj_chi2: f64,
    #[serde(rename = "vizTags")]
    pub viz_tags: usize,
}

/// The serialized form of an [`OptimizedMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMap {
    pub tag_vertices: Vec<ProcessedVertex>,
    pub odometry_vertices: Vec<ProcessedOdometry>,
    pub waypoints_vertices: Vec<ProcessedVertex>,
}
